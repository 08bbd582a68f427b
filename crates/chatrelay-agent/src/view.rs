use chatrelay_core::{Channel, ChatId};
use chatrelay_session::Session;
use serde::{Deserialize, Serialize};

/// Read model of a chat, as returned to channel adapters and the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: ChatId,
    pub channel: Channel,
    pub channel_user_id: String,
    /// Omitted when nothing is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<PendingPrompt>,
    #[serde(default)]
    pub previous: Vec<ExchangeView>,
}

/// The prompt awaiting a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPrompt {
    pub prompt: String,
}

/// A completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeView {
    pub prompt: String,
    pub reply: String,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id(),
            channel: session.identity().channel,
            channel_user_id: session.identity().user_id.clone(),
            current: session.current().map(|c| PendingPrompt {
                prompt: c.prompt.clone(),
            }),
            previous: session
                .history()
                .iter()
                .map(|e| ExchangeView {
                    prompt: e.prompt.clone(),
                    reply: e.reply.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chatrelay_core::Identity;

    #[test]
    fn test_current_omitted_when_idle() {
        let mut session = Session::open(Identity::new(Channel::Telegram, "42"));
        session.prompt("q", "1@42").unwrap();
        session.reply("a").unwrap();

        let json = serde_json::to_value(SessionView::from(&session)).unwrap();
        assert!(json.get("current").is_none());
        assert_eq!(json["channel"], "telegram");
        assert_eq!(json["channel_user_id"], "42");
        assert_eq!(json["previous"][0]["reply"], "a");
    }

    #[test]
    fn test_current_shows_prompt_only() {
        let mut session = Session::open(Identity::new(Channel::Wechat, "w"));
        session.prompt("pending", "m").unwrap();

        let view = SessionView::from(&session);
        assert_eq!(view.current.unwrap().prompt, "pending");
        assert!(view.previous.is_empty());
    }
}
