use crate::policy::ExpiryReason;
use crate::session::Exchange;
use chatrelay_core::{Channel, ChatId, Identity};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Discriminant of a [`SessionEvent`], used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A chat was created.
    SessionStarted,
    /// A prompt was accepted and now awaits a reply.
    ExchangeOpened,
    /// The in-flight prompt received its reply.
    ExchangeCompleted,
    /// The in-flight prompt was abandoned without a reply.
    ExchangeInterrupted,
    /// The chat was ended on request.
    SessionEnded,
    /// The chat ended because of the expiry policy.
    SessionExpired,
}

impl EventKind {
    /// Every kind, in lifecycle order.
    pub const ALL: [EventKind; 6] = [
        EventKind::SessionStarted,
        EventKind::ExchangeOpened,
        EventKind::ExchangeCompleted,
        EventKind::ExchangeInterrupted,
        EventKind::SessionEnded,
        EventKind::SessionExpired,
    ];

    /// Snake-case name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::ExchangeOpened => "exchange_opened",
            EventKind::ExchangeCompleted => "exchange_completed",
            EventKind::ExchangeInterrupted => "exchange_interrupted",
            EventKind::SessionEnded => "session_ended",
            EventKind::SessionExpired => "session_expired",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Fields shared by every event: which chat, and whose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOrigin {
    /// Chat that produced the event.
    pub chat_id: ChatId,
    /// Owner of the chat.
    pub identity: Identity,
}

/// Domain event recorded by a session transition.
///
/// Each variant carries everything a notifier needs to render a message
/// without going back to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// See [`EventKind::SessionStarted`].
    SessionStarted {
        /// Chat and owner.
        origin: EventOrigin,
    },
    /// See [`EventKind::ExchangeOpened`].
    ExchangeOpened {
        /// Chat and owner.
        origin: EventOrigin,
        /// The prompt awaiting a reply.
        exchange: Exchange,
    },
    /// See [`EventKind::ExchangeCompleted`].
    ExchangeCompleted {
        /// Chat and owner.
        origin: EventOrigin,
        /// Prompt and reply as appended to the history.
        exchange: Exchange,
    },
    /// See [`EventKind::ExchangeInterrupted`].
    ExchangeInterrupted {
        /// Chat and owner.
        origin: EventOrigin,
        /// The abandoned prompt.
        exchange: Exchange,
        /// Why the exchange was dropped (e.g. `timeout`, `shutdown`).
        cause: String,
    },
    /// See [`EventKind::SessionEnded`].
    SessionEnded {
        /// Chat and owner.
        origin: EventOrigin,
    },
    /// See [`EventKind::SessionExpired`].
    SessionExpired {
        /// Chat and owner.
        origin: EventOrigin,
        /// Which limit was reached.
        reason: ExpiryReason,
    },
}

impl SessionEvent {
    /// The event's discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::SessionStarted { .. } => EventKind::SessionStarted,
            SessionEvent::ExchangeOpened { .. } => EventKind::ExchangeOpened,
            SessionEvent::ExchangeCompleted { .. } => EventKind::ExchangeCompleted,
            SessionEvent::ExchangeInterrupted { .. } => EventKind::ExchangeInterrupted,
            SessionEvent::SessionEnded { .. } => EventKind::SessionEnded,
            SessionEvent::SessionExpired { .. } => EventKind::SessionExpired,
        }
    }

    /// Chat and owner of the event.
    pub fn origin(&self) -> &EventOrigin {
        match self {
            SessionEvent::SessionStarted { origin }
            | SessionEvent::ExchangeOpened { origin, .. }
            | SessionEvent::ExchangeCompleted { origin, .. }
            | SessionEvent::ExchangeInterrupted { origin, .. }
            | SessionEvent::SessionEnded { origin }
            | SessionEvent::SessionExpired { origin, .. } => origin,
        }
    }

    /// Chat that produced the event.
    pub fn chat_id(&self) -> ChatId {
        self.origin().chat_id
    }

    /// Owner of the chat.
    pub fn identity(&self) -> &Identity {
        &self.origin().identity
    }

    /// Channel the owner writes from.
    pub fn channel(&self) -> Channel {
        self.origin().identity.channel
    }

    /// Exchange snapshot, for the kinds that concern one.
    pub fn exchange(&self) -> Option<&Exchange> {
        match self {
            SessionEvent::ExchangeOpened { exchange, .. }
            | SessionEvent::ExchangeCompleted { exchange, .. }
            | SessionEvent::ExchangeInterrupted { exchange, .. } => Some(exchange),
            SessionEvent::SessionStarted { .. }
            | SessionEvent::SessionEnded { .. }
            | SessionEvent::SessionExpired { .. } => None,
        }
    }

    /// Interruption cause, if any.
    pub fn cause(&self) -> Option<&str> {
        match self {
            SessionEvent::ExchangeInterrupted { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventCollection
// ---------------------------------------------------------------------------

/// Ordered buffer of events recorded since the last successful save.
///
/// Never persisted. Drained by the caller after the store accepted the
/// mutation; dropped with the session when the save failed.
#[derive(Debug, Clone, Default)]
pub struct EventCollection {
    events: Vec<SessionEvent>,
}

impl EventCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn add(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pending events, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, SessionEvent> {
        self.events.iter()
    }

    /// Takes every pending event, leaving the collection empty.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drops every pending event.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn origin() -> EventOrigin {
        EventOrigin {
            chat_id: ChatId::new(),
            identity: Identity::new(Channel::Telegram, "u1"),
        }
    }

    #[test]
    fn test_drain_empties_collection() {
        let mut events = EventCollection::new();
        events.add(SessionEvent::SessionStarted { origin: origin() });
        events.add(SessionEvent::SessionEnded { origin: origin() });
        assert_eq!(events.len(), 2);

        let drained = events.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind(), EventKind::SessionStarted);
        assert_eq!(drained[1].kind(), EventKind::SessionEnded);
        assert!(events.is_empty());
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_accessors() {
        let event = SessionEvent::ExchangeInterrupted {
            origin: origin(),
            exchange: Exchange::new("hello", "m1"),
            cause: "timeout".into(),
        };
        assert_eq!(event.kind(), EventKind::ExchangeInterrupted);
        assert_eq!(event.channel(), Channel::Telegram);
        assert_eq!(event.identity().user_id, "u1");
        assert_eq!(event.exchange().unwrap().prompt, "hello");
        assert_eq!(event.cause(), Some("timeout"));

        let started = SessionEvent::SessionStarted { origin: origin() };
        assert!(started.exchange().is_none());
        assert!(started.cause().is_none());
    }

    #[test]
    fn test_serialized_tag_matches_kind_name() {
        let event = SessionEvent::SessionExpired {
            origin: origin(),
            reason: ExpiryReason::HistoryCap,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], event.kind().as_str());
        assert_eq!(json["reason"], "history_cap");
    }
}
