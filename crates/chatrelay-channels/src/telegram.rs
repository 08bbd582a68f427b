use chatrelay_core::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Default Telegram Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API client for outbound messages.
///
/// Inbound updates arrive through the webhook served by the HTTP gateway;
/// their payload types live here so both sides agree on the format.
pub struct TelegramClient {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
}

// ── Telegram API types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[allow(dead_code)]
    result: Option<T>,
}

/// An incoming webhook update (simplified).
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SendChatActionRequest<'a> {
    chat_id: i64,
    action: &'a str,
}

// ── Message references ──────────────────────────────────────────────────────

/// Where a prompt came from, stored with the exchange as
/// `"{message_id}@{chat_id}"` so replies can quote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub message_id: i64,
    pub chat_id: i64,
}

impl MessageRef {
    pub fn of(message: &Message) -> Self {
        Self {
            message_id: message.message_id,
            chat_id: message.chat.id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.message_id, self.chat_id)
    }
}

impl FromStr for MessageRef {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RelayError::InvalidInput(format!("bad telegram message ref '{s}'"));
        let (message_id, chat_id) = s.split_once('@').ok_or_else(bad)?;
        Ok(Self {
            message_id: message_id.parse().map_err(|_| bad())?,
            chat_id: chat_id.parse().map_err(|_| bad())?,
        })
    }
}

// ── Implementation ──────────────────────────────────────────────────────────

impl TelegramClient {
    /// Create a client for `bot_token` against the public Bot API.
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_api_base(bot_token, DEFAULT_API_BASE)
    }

    /// Create a client against a custom Bot API server.
    pub fn with_api_base(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// `sendMessage`, optionally quoting `reply_to`.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> RelayResult<()> {
        let payload = SendMessageRequest {
            chat_id,
            text,
            reply_to_message_id: reply_to,
        };
        self.call("sendMessage", &payload).await
    }

    /// `sendChatAction`, e.g. `typing`.
    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> RelayResult<()> {
        let payload = SendChatActionRequest { chat_id, action };
        self.call("sendChatAction", &payload).await
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    async fn call<P: Serialize + ?Sized>(&self, method: &str, payload: &P) -> RelayResult<()> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|e| RelayError::Channel(format!("Telegram {method} error: {e}")))?;

        let body: TelegramResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| RelayError::Channel(format!("Telegram parse error: {e}")))?;

        if !body.ok {
            return Err(RelayError::Channel(format!(
                "Telegram {method} failed: {}",
                body.description.unwrap_or_default()
            )));
        }

        debug!(method, "Telegram call succeeded");
        Ok(())
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}
