use crate::telegram::{MessageRef, TelegramClient};
use async_trait::async_trait;
use chatrelay_core::{Channel, RelayError, RelayResult};
use chatrelay_session::{EventHandler, EventKind, SessionEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sent when a chat is started from Telegram.
pub const TEXT_STARTED: &str = "A new chat has started.";
/// Sent when a chat ends, on request or by expiry.
pub const TEXT_ENDED: &str = "The current chat has been ended.";
/// Sent as a reply to a prompt that will not be answered.
pub const TEXT_INTERRUPTED: &str = "[ERR] this conversation was interrupted, you can try again";

/// A Bot API call derived from one session event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Message {
        chat_id: i64,
        text: String,
        reply_to: Option<i64>,
    },
    Action {
        chat_id: i64,
        action: &'static str,
    },
}

/// Maps a session event to the Telegram call that tells the user about it.
///
/// Exchange events are sent to the chat the prompt came from and quote it.
/// Chat-level events go to the owner's private chat, whose id equals the
/// Telegram user id. `SessionStarted` renders nothing: the webhook already
/// acknowledged the command.
pub fn render(event: &SessionEvent) -> RelayResult<Option<Outgoing>> {
    let origin = match event.exchange() {
        Some(exchange) => Some(exchange.message_ref.parse::<MessageRef>()?),
        None => None,
    };
    let owner_chat = || -> RelayResult<i64> {
        event.identity().user_id.parse().map_err(|_| {
            RelayError::InvalidInput(format!(
                "telegram user id '{}' is not numeric",
                event.identity().user_id
            ))
        })
    };

    let outgoing = match (event, origin) {
        (SessionEvent::SessionStarted { .. }, _) => None,
        (SessionEvent::ExchangeOpened { .. }, Some(origin)) => Some(Outgoing::Action {
            chat_id: origin.chat_id,
            action: "typing",
        }),
        (SessionEvent::ExchangeCompleted { exchange, .. }, Some(origin)) => {
            Some(Outgoing::Message {
                chat_id: origin.chat_id,
                text: exchange.reply.clone(),
                reply_to: Some(origin.message_id),
            })
        }
        (SessionEvent::ExchangeInterrupted { .. }, Some(origin)) => Some(Outgoing::Message {
            chat_id: origin.chat_id,
            text: TEXT_INTERRUPTED.to_string(),
            reply_to: Some(origin.message_id),
        }),
        (SessionEvent::SessionEnded { .. } | SessionEvent::SessionExpired { .. }, _) => {
            Some(Outgoing::Message {
                chat_id: owner_chat()?,
                text: TEXT_ENDED.to_string(),
                reply_to: None,
            })
        }
        // Exchange events always carry an exchange.
        (_, None) => None,
    };
    Ok(outgoing)
}

/// Dispatcher subscriber delivering Telegram chats' events to users.
pub struct TelegramNotifier {
    client: Arc<TelegramClient>,
}

impl TelegramNotifier {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }

    async fn send(&self, outgoing: Outgoing) -> RelayResult<()> {
        match outgoing {
            Outgoing::Message {
                chat_id,
                text,
                reply_to,
            } => self.client.send_message(chat_id, &text, reply_to).await,
            Outgoing::Action { chat_id, action } => {
                self.client.send_chat_action(chat_id, action).await
            }
        }
    }
}

#[async_trait]
impl EventHandler for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    fn listening(&self) -> Vec<EventKind> {
        EventKind::ALL.to_vec()
    }

    fn channel(&self) -> Option<Channel> {
        Some(Channel::Telegram)
    }

    async fn handle(&self, cancel: &CancellationToken, event: &SessionEvent) -> RelayResult<()> {
        let Some(outgoing) = render(event)? else {
            return Ok(());
        };
        debug!(chat_id = %event.chat_id(), event_kind = %event.kind(), "Notifying telegram user");

        tokio::select! {
            result = self.send(outgoing) => result,
            _ = cancel.cancelled() => {
                warn!(chat_id = %event.chat_id(), event_kind = %event.kind(), "Telegram notification cancelled");
                Err(RelayError::Channel("notification cancelled".into()))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chatrelay_core::{ChatId, Identity};
    use chatrelay_session::{EventOrigin, Exchange, ExpiryReason};

    fn origin() -> EventOrigin {
        EventOrigin {
            chat_id: ChatId::new(),
            identity: Identity::new(Channel::Telegram, "42"),
        }
    }

    #[test]
    fn test_started_renders_nothing() {
        let event = SessionEvent::SessionStarted { origin: origin() };
        assert_eq!(render(&event).unwrap(), None);
    }

    #[test]
    fn test_opened_renders_typing() {
        let event = SessionEvent::ExchangeOpened {
            origin: origin(),
            exchange: Exchange::new("hi", "7@-5"),
        };
        assert_eq!(
            render(&event).unwrap(),
            Some(Outgoing::Action {
                chat_id: -5,
                action: "typing"
            })
        );
    }

    #[test]
    fn test_completed_quotes_prompt() {
        let mut exchange = Exchange::new("hi", "7@42");
        exchange.reply = "hello there".into();
        let event = SessionEvent::ExchangeCompleted {
            origin: origin(),
            exchange,
        };
        assert_eq!(
            render(&event).unwrap(),
            Some(Outgoing::Message {
                chat_id: 42,
                text: "hello there".into(),
                reply_to: Some(7),
            })
        );
    }

    #[test]
    fn test_interrupted_and_ended_texts() {
        let interrupted = SessionEvent::ExchangeInterrupted {
            origin: origin(),
            exchange: Exchange::new("hi", "8@42"),
            cause: "timeout".into(),
        };
        let Some(Outgoing::Message { text, reply_to, .. }) = render(&interrupted).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(text, TEXT_INTERRUPTED);
        assert_eq!(reply_to, Some(8));

        let expired = SessionEvent::SessionExpired {
            origin: origin(),
            reason: ExpiryReason::Age,
        };
        assert_eq!(
            render(&expired).unwrap(),
            Some(Outgoing::Message {
                chat_id: 42,
                text: TEXT_ENDED.into(),
                reply_to: None,
            })
        );
    }

    #[test]
    fn test_bad_refs_are_errors() {
        let event = SessionEvent::ExchangeOpened {
            origin: origin(),
            exchange: Exchange::new("hi", "not-a-ref"),
        };
        assert!(render(&event).is_err());

        let ended = SessionEvent::SessionEnded {
            origin: EventOrigin {
                chat_id: ChatId::new(),
                identity: Identity::new(Channel::Telegram, "alice"),
            },
        };
        assert!(render(&ended).is_err());
    }
}
