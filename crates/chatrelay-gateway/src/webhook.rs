use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chatrelay_channels::{telegram::Message, MessageRef, Update, TEXT_STARTED};
use chatrelay_core::{Channel, Identity};
use std::sync::Arc;
use tracing::{info, warn};

/// Validate that a request secret matches the configured secret using constant-time comparison.
///
/// Returns `true` if both secrets are equal, using a constant-time algorithm
/// to prevent timing side-channel attacks.
pub fn validate_secret(config_secret: &str, request_secret: &str) -> bool {
    let a = config_secret.as_bytes();
    let b = request_secret.as_bytes();

    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// What an inbound chat message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    End,
    Current,
    Prompt(&'a str),
}

impl<'a> Command<'a> {
    /// Bot commands may carry a `@botname` suffix in group chats.
    pub fn parse(text: &'a str) -> Self {
        let trimmed = text.trim();
        let head = trimmed.split('@').next().unwrap_or(trimmed);
        match head {
            "/start" => Command::Start,
            "/end" => Command::End,
            "/current" => Command::Current,
            _ => Command::Prompt(text),
        }
    }
}

/// Runs `text` against the chat service and returns the acknowledgement to
/// send back, if any. Prompt replies are not acknowledged here: they reach the
/// user through the notifier.
async fn execute(state: &AppState, identity: &Identity, message: &Message, text: &str) -> Option<String> {
    match Command::parse(text) {
        Command::Start => Some(match state.service.start_session(identity).await {
            Ok(_) => TEXT_STARTED.to_string(),
            Err(e) => format!("[ERR] {e}"),
        }),
        Command::End => {
            // The notifier confirms the end once it is persisted.
            state.service.end_session(identity).await;
            None
        }
        Command::Current => Some(match state.service.get_active(identity).await {
            Ok(view) => serde_json::to_string(&view).unwrap_or_else(|e| format!("[ERR] {e}")),
            Err(e) => format!("[ERR] {e}"),
        }),
        Command::Prompt(prompt) => {
            let message_ref = MessageRef::of(message).to_string();
            match state.service.submit_prompt(identity, prompt, &message_ref).await {
                Ok(()) => None,
                Err(e) => Some(format!("[ERR] {e}")),
            }
        }
    }
}

/// `POST /api/v1/telegram/callback`
///
/// Parses a Telegram update and maps the message text to a chat use-case.
/// Updates without a text message are acknowledged and ignored. Command
/// acknowledgements are sent on a detached task so the webhook answers
/// immediately.
pub async fn telegram_callback(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Received invalid callback from telegram");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let Some(message) = update.message else {
        return Json(serde_json::json!({"ok": true})).into_response();
    };
    let (Some(from), Some(text)) = (message.from.as_ref(), message.text.as_deref()) else {
        return Json(serde_json::json!({"ok": true})).into_response();
    };

    let identity = Identity::new(Channel::Telegram, from.id.to_string());
    info!(
        telegram_user_id = from.id,
        telegram_chat_id = message.chat.id,
        telegram_message_id = message.message_id,
        "Telegram message received"
    );

    let ack = execute(&state, &identity, &message, text).await;

    if let (Some(ack), Some(client)) = (ack, state.telegram.clone()) {
        let chat_id = message.chat.id;
        tokio::spawn(async move {
            if let Err(e) = client.send_message(chat_id, &ack, None).await {
                warn!(telegram_chat_id = chat_id, error = %e, "Failed to send acknowledgement");
            }
        });
    }

    Json(serde_json::json!({"ok": true})).into_response()
}
