//! The chat aggregate.
//!
//! A [`Session`] owns every state transition of one user's conversation on
//! one channel. Transitions are pure: they validate, mutate and record a
//! [`SessionEvent`], and a failed transition leaves the session untouched.
//!
//! # Invariants
//!
//! - At most one exchange is in flight.
//! - An opened exchange never has an empty prompt.
//! - An ended session accepts no new exchanges and never reopens.
//! - History is append-only; replies are fixed when appended.

use crate::event::{EventCollection, EventOrigin, SessionEvent};
use crate::policy::{ExpiryReason, SessionPolicy};
use chatrelay_core::{ChatId, Identity, RelayError, RelayResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cause recorded when ending a chat preempts its in-flight exchange.
pub const CAUSE_SHUTDOWN: &str = "shutdown";

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// One prompt/reply pair. An empty reply means "not answered yet".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// Reference to the inbound channel message that carried the prompt.
    pub message_ref: String,
    /// What the user asked.
    pub prompt: String,
    /// What the completion service answered.
    #[serde(default)]
    pub reply: String,
}

impl Exchange {
    /// Creates an unanswered exchange.
    pub fn new(prompt: impl Into<String>, message_ref: impl Into<String>) -> Self {
        Self {
            message_ref: message_ref.into(),
            prompt: prompt.into(),
            reply: String::new(),
        }
    }

    /// Whether a reply has been recorded.
    pub fn is_replied(&self) -> bool {
        !self.reply.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SessionStatus / SessionSnapshot
// ---------------------------------------------------------------------------

/// Lifecycle state. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting prompts.
    Ready,
    /// Closed for good.
    Ended,
}

impl SessionStatus {
    /// Stable integer code used by persistent stores.
    pub fn code(self) -> i64 {
        match self {
            SessionStatus::Ready => 0,
            SessionStatus::Ended => 1,
        }
    }

    /// Inverse of [`SessionStatus::code`].
    pub fn from_code(code: i64) -> RelayResult<Self> {
        match code {
            0 => Ok(SessionStatus::Ready),
            1 => Ok(SessionStatus::Ended),
            other => Err(RelayError::Store(format!("unknown session status {other}"))),
        }
    }
}

/// The persisted state of a session, without pending events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Primary key.
    pub id: ChatId,
    /// Owner.
    pub identity: Identity,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// In-flight exchange, if any.
    pub current: Option<Exchange>,
    /// Completed exchanges, oldest first.
    pub history: Vec<Exchange>,
    /// Exchanges opened minus exchanges interrupted.
    pub exchange_count: u32,
    /// Optimistic-concurrency version; `0` means never persisted.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Aggregate root of one conversation.
#[derive(Debug, Clone)]
pub struct Session {
    id: ChatId,
    identity: Identity,
    status: SessionStatus,
    current: Option<Exchange>,
    history: Vec<Exchange>,
    exchange_count: u32,
    version: u64,
    created_at: DateTime<Utc>,
    events: EventCollection,
}

impl Session {
    /// Opens a new, never-persisted session and records `SessionStarted`.
    pub fn open(identity: Identity) -> Self {
        Self::open_at(identity, Utc::now())
    }

    /// Like [`Session::open`] with an explicit creation time.
    pub fn open_at(identity: Identity, created_at: DateTime<Utc>) -> Self {
        let mut session = Self {
            id: ChatId::new(),
            identity,
            status: SessionStatus::Ready,
            current: None,
            history: Vec::new(),
            exchange_count: 0,
            version: 0,
            created_at,
            events: EventCollection::new(),
        };
        let origin = session.origin();
        session.events.add(SessionEvent::SessionStarted { origin });
        session
    }

    /// Rebuilds a session from persisted state. Records no events.
    pub fn restore(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            identity: snapshot.identity,
            status: snapshot.status,
            current: snapshot.current,
            history: snapshot.history,
            exchange_count: snapshot.exchange_count,
            version: snapshot.version,
            created_at: snapshot.created_at,
            events: EventCollection::new(),
        }
    }

    /// Persistable copy of the current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            identity: self.identity.clone(),
            status: self.status,
            current: self.current.clone(),
            history: self.history.clone(),
            exchange_count: self.exchange_count,
            version: self.version,
            created_at: self.created_at,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Primary key.
    pub fn id(&self) -> ChatId {
        self.id
    }

    /// Owner.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Whether the session has ended.
    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    /// The exchange awaiting a reply.
    pub fn current(&self) -> Option<&Exchange> {
        self.current.as_ref()
    }

    /// Completed exchanges, oldest first.
    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    /// Exchanges opened minus exchanges interrupted.
    pub fn exchange_count(&self) -> u32 {
        self.exchange_count
    }

    /// Optimistic-concurrency version; `0` means never persisted.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Events recorded since the last drain.
    pub fn pending_events(&self) -> &EventCollection {
        &self.events
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// Opens an exchange for `text`.
    ///
    /// # Errors
    ///
    /// - `Terminated` if the session has ended
    /// - `Conflict` if an exchange is already in flight
    /// - `InvalidInput` if `text` is empty
    pub fn prompt(
        &mut self,
        text: impl Into<String>,
        message_ref: impl Into<String>,
    ) -> RelayResult<()> {
        if self.is_ended() {
            return Err(RelayError::Terminated);
        }
        if self.current.is_some() {
            return Err(RelayError::Conflict(
                "the previous conversation has not yet ended".into(),
            ));
        }
        let text = text.into();
        if text.is_empty() {
            return Err(RelayError::InvalidInput("disallow empty prompt".into()));
        }

        let exchange = Exchange::new(text, message_ref);
        self.current = Some(exchange.clone());
        self.exchange_count += 1;
        let origin = self.origin();
        self.events
            .add(SessionEvent::ExchangeOpened { origin, exchange });
        Ok(())
    }

    /// Records `text` as the reply of the in-flight exchange and moves it
    /// into the history. Returns the completed exchange.
    ///
    /// # Errors
    ///
    /// - `NoActiveExchange` if nothing is in flight
    /// - `InvalidInput` if `text` is empty
    /// - `AlreadyReplied` if the in-flight exchange carries a reply
    pub fn reply(&mut self, text: impl Into<String>) -> RelayResult<Exchange> {
        let Some(current) = self.current.as_ref() else {
            return Err(RelayError::NoActiveExchange);
        };
        let text = text.into();
        if text.is_empty() {
            return Err(RelayError::InvalidInput("disallow empty reply".into()));
        }
        if current.is_replied() {
            return Err(RelayError::AlreadyReplied);
        }

        let mut exchange = self.current.take().ok_or(RelayError::NoActiveExchange)?;
        exchange.reply = text;
        self.history.push(exchange.clone());
        let origin = self.origin();
        self.events.add(SessionEvent::ExchangeCompleted {
            origin,
            exchange: exchange.clone(),
        });
        Ok(exchange)
    }

    /// Drops the in-flight exchange without touching the history.
    ///
    /// Returns the dropped exchange, or `None` (and records nothing) when no
    /// exchange was in flight.
    pub fn interrupt(&mut self, cause: impl Into<String>) -> Option<Exchange> {
        let exchange = self.current.take()?;
        self.exchange_count = self.exchange_count.saturating_sub(1);
        let origin = self.origin();
        self.events.add(SessionEvent::ExchangeInterrupted {
            origin,
            exchange: exchange.clone(),
            cause: cause.into(),
        });
        Some(exchange)
    }

    /// Ends the session. A no-op when already ended.
    pub fn end(&mut self) {
        if self.is_ended() {
            return;
        }
        self.interrupt(CAUSE_SHUTDOWN);
        self.status = SessionStatus::Ended;
        let origin = self.origin();
        self.events.add(SessionEvent::SessionEnded { origin });
    }

    // ── Expiry ──────────────────────────────────────────────────────────

    /// Which policy limit, if any, the session has reached at `now`.
    ///
    /// Never reports a limit while an exchange is in flight or once the
    /// session has ended.
    pub fn expiry(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> Option<ExpiryReason> {
        if self.is_ended() || self.current.is_some() {
            return None;
        }
        if self.history.len() >= policy.max_exchanges {
            return Some(ExpiryReason::HistoryCap);
        }
        if now - self.created_at >= policy.expiry {
            return Some(ExpiryReason::Age);
        }
        None
    }

    /// Pure query: would [`Session::evaluate`] end this session at `now`?
    pub fn is_expired(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        self.expiry(now, policy).is_some()
    }

    /// Applies the expiry policy.
    ///
    /// Ends the session and records `SessionExpired` when a limit is
    /// reached. Returns whether the session is now unusable (expired here or
    /// ended earlier). Callers must persist the session when this changed it.
    pub fn evaluate(&mut self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        if self.is_ended() {
            return true;
        }
        let Some(reason) = self.expiry(now, policy) else {
            return false;
        };
        self.status = SessionStatus::Ended;
        let origin = self.origin();
        self.events
            .add(SessionEvent::SessionExpired { origin, reason });
        true
    }

    // ── Persistence hooks ───────────────────────────────────────────────

    /// Takes the events recorded since the last drain.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain()
    }

    /// Drops pending events, e.g. after a failed save.
    pub fn discard_events(&mut self) {
        self.events.clear();
    }

    /// Sets the version after a successful save. Stores only.
    pub fn mark_persisted(&mut self, version: u64) {
        self.version = version;
    }

    fn origin(&self) -> EventOrigin {
        EventOrigin {
            chat_id: self.id,
            identity: self.identity.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use chatrelay_core::Channel;
    use chrono::TimeDelta;

    fn telegram(user: &str) -> Identity {
        Identity::new(Channel::Telegram, user)
    }

    fn kinds(session: &mut Session) -> Vec<EventKind> {
        session.take_events().iter().map(SessionEvent::kind).collect()
    }

    #[test]
    fn test_open_records_started() {
        let mut session = Session::open(telegram("u1"));
        assert_eq!(session.version(), 0);
        assert_eq!(session.status(), SessionStatus::Ready);
        assert!(session.history().is_empty());
        assert!(session.current().is_none());
        assert_eq!(kinds(&mut session), vec![EventKind::SessionStarted]);
    }

    #[test]
    fn test_prompt_then_reply() {
        let mut session = Session::open(telegram("u1"));
        session.take_events();

        session.prompt("hello", "m1").unwrap();
        assert_eq!(session.current().unwrap().prompt, "hello");
        assert_eq!(session.exchange_count(), 1);

        let done = session.reply("hi!").unwrap();
        assert_eq!(done.prompt, "hello");
        assert_eq!(done.reply, "hi!");
        assert!(session.current().is_none());
        assert_eq!(session.history().len(), 1);

        let events = session.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::ExchangeOpened);
        let completed = events[1].exchange().unwrap();
        assert_eq!(completed.prompt, "hello");
        assert_eq!(completed.reply, "hi!");
    }

    #[test]
    fn test_second_prompt_conflicts_and_changes_nothing() {
        let mut session = Session::open(telegram("u1"));
        session.prompt("first", "m1").unwrap();
        let before = session.snapshot();
        let pending = session.pending_events().len();

        let err = session.prompt("second", "m2").unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(session.snapshot(), before);
        assert_eq!(session.pending_events().len(), pending);
    }

    #[test]
    fn test_empty_prompt_rejected() {
        let mut session = Session::open(telegram("u1"));
        let err = session.prompt("", "m1").unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
        assert!(session.current().is_none());
        assert_eq!(session.exchange_count(), 0);
    }

    #[test]
    fn test_empty_reply_keeps_current() {
        let mut session = Session::open(telegram("u1"));
        session.prompt("hello", "m1").unwrap();
        let err = session.reply("").unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
        assert_eq!(session.current().unwrap().prompt, "hello");
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_reply_without_exchange() {
        let mut session = Session::open(telegram("u1"));
        assert!(matches!(
            session.reply("orphan"),
            Err(RelayError::NoActiveExchange)
        ));
    }

    #[test]
    fn test_reply_to_replied_restored_exchange() {
        let mut snapshot = Session::open(telegram("u1")).snapshot();
        snapshot.current = Some(Exchange {
            message_ref: "m1".into(),
            prompt: "hello".into(),
            reply: "already".into(),
        });
        let mut session = Session::restore(snapshot);
        assert!(matches!(
            session.reply("again"),
            Err(RelayError::AlreadyReplied)
        ));
    }

    #[test]
    fn test_interrupt_decrements_count() {
        let mut session = Session::open(telegram("u1"));
        session.take_events();
        session.prompt("hello", "m1").unwrap();
        session.take_events();

        let dropped = session.interrupt("timeout").unwrap();
        assert_eq!(dropped.prompt, "hello");
        assert!(session.current().is_none());
        assert!(session.history().is_empty());
        assert_eq!(session.exchange_count(), 0);

        let events = session.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].cause(), Some("timeout"));
    }

    #[test]
    fn test_interrupt_without_exchange_is_silent() {
        let mut session = Session::open(telegram("u1"));
        session.take_events();
        assert!(session.interrupt("timeout").is_none());
        assert!(session.pending_events().is_empty());
        assert_eq!(session.exchange_count(), 0);
    }

    #[test]
    fn test_end_interrupts_and_is_idempotent() {
        let mut session = Session::open(telegram("u1"));
        session.take_events();
        session.prompt("hello", "m1").unwrap();
        session.take_events();

        session.end();
        assert!(session.is_ended());
        assert!(session.current().is_none());
        assert_eq!(
            kinds(&mut session),
            vec![EventKind::ExchangeInterrupted, EventKind::SessionEnded]
        );

        session.end();
        assert!(session.pending_events().is_empty());
    }

    #[test]
    fn test_prompt_after_end_is_terminated() {
        let mut session = Session::open(telegram("u1"));
        session.end();
        assert!(matches!(
            session.prompt("hello", "m1"),
            Err(RelayError::Terminated)
        ));
        assert!(matches!(session.prompt("", "m1"), Err(RelayError::Terminated)));
    }

    #[test]
    fn test_current_tracks_last_transition() {
        let mut session = Session::open(telegram("u1"));
        let steps: [(&str, bool); 6] = [
            ("prompt", true),
            ("reply", false),
            ("prompt", true),
            ("interrupt", false),
            ("prompt", true),
            ("reply", false),
        ];
        for (i, (step, in_flight)) in steps.iter().enumerate() {
            match *step {
                "prompt" => session.prompt(format!("q{i}"), format!("m{i}")).unwrap(),
                "reply" => {
                    session.reply(format!("a{i}")).unwrap();
                }
                _ => {
                    session.interrupt("error");
                }
            }
            assert_eq!(session.current().is_some(), *in_flight, "after {step}");
        }
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.exchange_count(), 2);
    }

    #[test]
    fn test_expiry_by_history_cap() {
        let policy = SessionPolicy::new(2, TimeDelta::hours(12));
        let mut session = Session::open(telegram("u1"));
        let now = session.created_at();
        for i in 0..2 {
            assert!(!session.is_expired(now, &policy));
            session.prompt(format!("q{i}"), format!("m{i}")).unwrap();
            session.reply(format!("a{i}")).unwrap();
        }
        assert_eq!(session.expiry(now, &policy), Some(ExpiryReason::HistoryCap));
    }

    #[test]
    fn test_expiry_by_age() {
        let policy = SessionPolicy::default();
        let created = Utc::now() - TimeDelta::hours(13);
        let session = Session::open_at(telegram("u1"), created);
        assert_eq!(
            session.expiry(Utc::now(), &policy),
            Some(ExpiryReason::Age)
        );
        assert!(!session.is_expired(created + TimeDelta::hours(11), &policy));
    }

    #[test]
    fn test_no_expiry_while_in_flight() {
        let policy = SessionPolicy::default();
        let created = Utc::now() - TimeDelta::hours(13);
        let mut session = Session::open_at(telegram("u1"), created);
        session.prompt("hello", "m1").unwrap();
        assert!(!session.is_expired(Utc::now(), &policy));
        assert!(!session.evaluate(Utc::now(), &policy));
        assert!(!session.is_ended());
    }

    #[test]
    fn test_is_expired_does_not_mutate() {
        let policy = SessionPolicy::default();
        let mut session = Session::open_at(telegram("u1"), Utc::now() - TimeDelta::days(1));
        session.take_events();
        assert!(session.is_expired(Utc::now(), &policy));
        assert!(!session.is_ended());
        assert!(session.pending_events().is_empty());
    }

    #[test]
    fn test_evaluate_ends_and_records_once() {
        let policy = SessionPolicy::default();
        let mut session = Session::open_at(telegram("u1"), Utc::now() - TimeDelta::days(1));
        session.take_events();

        assert!(session.evaluate(Utc::now(), &policy));
        assert!(session.is_ended());
        let events = session.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SessionEvent::SessionExpired {
                reason: ExpiryReason::Age,
                ..
            }
        ));

        assert!(session.evaluate(Utc::now(), &policy));
        assert!(session.pending_events().is_empty());
    }

    #[test]
    fn test_restore_round_trip_records_nothing() {
        let mut session = Session::open(telegram("u1"));
        session.prompt("hello", "m1").unwrap();
        session.reply("hi").unwrap();
        session.prompt("again", "m2").unwrap();
        session.mark_persisted(3);

        let restored = Session::restore(session.snapshot());
        assert_eq!(restored.snapshot(), session.snapshot());
        assert!(restored.pending_events().is_empty());
    }
}
