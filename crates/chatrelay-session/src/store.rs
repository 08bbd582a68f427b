use crate::session::{Session, SessionSnapshot, SessionStatus};
use async_trait::async_trait;
use chatrelay_core::{ChatId, Identity, RelayError, RelayResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Durable home of sessions, guarded by optimistic concurrency.
///
/// Implementations must honor the same contract:
///
/// - `save` of a never-persisted session (`version == 0`) inserts it only if
///   its identity owns no other active session; otherwise
///   `Conflict("duplicate session")`.
/// - `save` of a persisted session is a compare-and-swap on `version`; a
///   lost race yields `Conflict("stale version")`. Nothing is retried here.
/// - History rows are append-only and each position is written at most once.
/// - On success the in-memory session's version is advanced to the stored one.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The identity's session that has not ended.
    async fn find_active(&self, identity: &Identity) -> RelayResult<Session>;

    /// Any session, ended or not.
    async fn find_by_id(&self, id: ChatId) -> RelayResult<Session>;

    /// Creates or updates `session`. See the trait docs.
    async fn save(&self, session: &mut Session) -> RelayResult<()>;
}

pub(crate) fn duplicate_session() -> RelayError {
    RelayError::Conflict("duplicate session".into())
}

pub(crate) fn stale_version() -> RelayError {
    RelayError::Conflict("stale version".into())
}

pub(crate) fn no_active_session(identity: &Identity) -> RelayError {
    RelayError::NotFound(format!("no active chat for {identity}"))
}

pub(crate) fn unknown_chat(id: ChatId) -> RelayError {
    RelayError::NotFound(format!("chat {id}"))
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// Process-local store. One lock covers the whole map, so creation checks
/// and version swaps are atomic. Nothing survives a restart.
#[derive(Default)]
pub struct MemorySessionStore {
    chats: Mutex<HashMap<ChatId, SessionSnapshot>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, ended ones included.
    pub fn len(&self) -> usize {
        self.chats.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.chats.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_active(&self, identity: &Identity) -> RelayResult<Session> {
        self.chats
            .lock()
            .values()
            .find(|s| s.identity == *identity && s.status != SessionStatus::Ended)
            .cloned()
            .map(Session::restore)
            .ok_or_else(|| no_active_session(identity))
    }

    async fn find_by_id(&self, id: ChatId) -> RelayResult<Session> {
        self.chats
            .lock()
            .get(&id)
            .cloned()
            .map(Session::restore)
            .ok_or_else(|| unknown_chat(id))
    }

    async fn save(&self, session: &mut Session) -> RelayResult<()> {
        let mut chats = self.chats.lock();
        let mut snapshot = session.snapshot();

        if snapshot.version == 0 {
            let taken = chats.contains_key(&snapshot.id)
                || chats.values().any(|s| {
                    s.identity == snapshot.identity && s.status != SessionStatus::Ended
                });
            if taken {
                return Err(duplicate_session());
            }
            snapshot.version = 1;
            chats.insert(snapshot.id, snapshot);
            session.mark_persisted(1);
            return Ok(());
        }

        let stored = chats
            .get_mut(&snapshot.id)
            .ok_or_else(|| unknown_chat(snapshot.id))?;
        if stored.version != snapshot.version {
            return Err(stale_version());
        }

        // Stored positions are immutable; only new positions are appended.
        let mut history = std::mem::take(&mut stored.history);
        let known = history.len();
        history.extend(snapshot.history.into_iter().skip(known));

        let version = stored.version + 1;
        *stored = SessionSnapshot {
            history,
            version,
            ..snapshot
        };
        session.mark_persisted(version);
        Ok(())
    }
}
