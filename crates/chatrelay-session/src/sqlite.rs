//! SQLite-backed [`SessionStore`].
//!
//! Two tables: `chat` holds the mutable head of each session (status,
//! in-flight exchange, version) and `exchange` holds the append-only
//! history keyed by `(chat_id, position)`. Ended chats are soft-deleted;
//! a partial unique index keeps at most one live chat per identity.

use crate::session::{Exchange, Session, SessionSnapshot, SessionStatus};
use crate::store::{
    duplicate_session, no_active_session, stale_version, unknown_chat, SessionStore,
};
use async_trait::async_trait;
use chatrelay_core::{Channel, ChatId, Identity, RelayError, RelayResult};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

const CHAT_COLUMNS: &str = "id, channel, channel_user_id, status, exchange_count, \
     current_prompt, current_message_ref, current_reply, version, created_at";

/// Only uniqueness violations mean a duplicate chat; any other constraint
/// failure is a storage fault.
fn store_err(e: rusqlite::Error) -> RelayError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::ConstraintViolation
                && matches!(
                    f.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
        {
            duplicate_session()
        }
        _ => RelayError::Store(e.to_string()),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> RelayResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RelayError::Store(format!("bad timestamp '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

fn migrate(conn: &Connection) -> RelayResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(store_err)?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(store_err)?;

    if current < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat (
                id TEXT PRIMARY KEY,
                channel INTEGER NOT NULL,
                channel_user_id TEXT NOT NULL,
                status INTEGER NOT NULL,
                exchange_count INTEGER NOT NULL DEFAULT 0,
                current_prompt TEXT,
                current_message_ref TEXT,
                current_reply TEXT,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_active_identity
                ON chat(channel, channel_user_id) WHERE deleted = 0;

            CREATE TABLE IF NOT EXISTS exchange (
                chat_id TEXT NOT NULL REFERENCES chat(id),
                position INTEGER NOT NULL,
                message_ref TEXT NOT NULL,
                prompt TEXT NOT NULL,
                reply TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (chat_id, position)
            );",
        )
        .map_err(store_err)?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])
            .map_err(store_err)?;
        info!(version = 1, "Applied session schema migration");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct ChatRow {
    id: String,
    channel: i64,
    channel_user_id: String,
    status: i64,
    exchange_count: i64,
    current_prompt: Option<String>,
    current_message_ref: Option<String>,
    current_reply: Option<String>,
    version: i64,
    created_at: String,
}

impl ChatRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel: row.get(1)?,
            channel_user_id: row.get(2)?,
            status: row.get(3)?,
            exchange_count: row.get(4)?,
            current_prompt: row.get(5)?,
            current_message_ref: row.get(6)?,
            current_reply: row.get(7)?,
            version: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_snapshot(self, history: Vec<Exchange>) -> RelayResult<SessionSnapshot> {
        let id: ChatId = self
            .id
            .parse()
            .map_err(|_| RelayError::Store(format!("bad chat id '{}'", self.id)))?;
        let current = self.current_prompt.map(|prompt| Exchange {
            prompt,
            message_ref: self.current_message_ref.unwrap_or_default(),
            reply: self.current_reply.unwrap_or_default(),
        });
        Ok(SessionSnapshot {
            id,
            identity: Identity::new(Channel::from_code(self.channel)?, self.channel_user_id),
            status: SessionStatus::from_code(self.status)?,
            current,
            history,
            exchange_count: u32::try_from(self.exchange_count)
                .map_err(|_| RelayError::Store("negative exchange count".into()))?,
            version: u64::try_from(self.version)
                .map_err(|_| RelayError::Store("negative version".into()))?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn load_history(conn: &Connection, id: &str) -> RelayResult<Vec<Exchange>> {
    let mut stmt = conn
        .prepare(
            "SELECT message_ref, prompt, reply FROM exchange
             WHERE chat_id = ?1 ORDER BY position",
        )
        .map_err(store_err)?;
    let rows = stmt
        .query_map([id], |row| {
            Ok(Exchange {
                message_ref: row.get(0)?,
                prompt: row.get(1)?,
                reply: row.get(2)?,
            })
        })
        .map_err(store_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
}

fn load_session(conn: &Connection, row: Option<ChatRow>) -> RelayResult<Option<Session>> {
    let Some(row) = row else {
        return Ok(None);
    };
    let history = load_history(conn, &row.id)?;
    Ok(Some(Session::restore(row.into_snapshot(history)?)))
}

/// Appends the positions of `history` not yet stored. Existing positions are
/// left untouched.
fn append_history(
    tx: &rusqlite::Transaction<'_>,
    id: &str,
    history: &[Exchange],
    now: &str,
) -> RelayResult<()> {
    let stored: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM exchange WHERE chat_id = ?1",
            [id],
            |row| row.get(0),
        )
        .map_err(store_err)?;
    let skip = usize::try_from(stored).unwrap_or(0);
    for (position, exchange) in history.iter().enumerate().skip(skip) {
        tx.execute(
            "INSERT OR IGNORE INTO exchange
                (chat_id, position, message_ref, prompt, reply, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                position as i64,
                exchange.message_ref,
                exchange.prompt,
                exchange.reply,
                now
            ],
        )
        .map_err(store_err)?;
    }
    Ok(())
}

fn insert_chat(conn: &mut Connection, snapshot: &SessionSnapshot) -> RelayResult<u64> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(store_err)?;
    let id = snapshot.id.to_string();
    let now = timestamp(Utc::now());
    let current = snapshot.current.as_ref();

    let inserted = tx
        .execute(
            "INSERT INTO chat
                (id, channel, channel_user_id, status, exchange_count, current_prompt,
                 current_message_ref, current_reply, version, created_at, updated_at, deleted)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10, ?11
             WHERE NOT EXISTS (
                SELECT 1 FROM chat WHERE channel = ?2 AND channel_user_id = ?3 AND deleted = 0
             )",
            params![
                id,
                snapshot.identity.channel.code(),
                snapshot.identity.user_id,
                snapshot.status.code(),
                i64::from(snapshot.exchange_count),
                current.map(|c| c.prompt.as_str()),
                current.map(|c| c.message_ref.as_str()),
                current.map(|c| c.reply.as_str()),
                timestamp(snapshot.created_at),
                now,
                i64::from(snapshot.status == SessionStatus::Ended),
            ],
        )
        .map_err(store_err)?;
    if inserted == 0 {
        return Err(duplicate_session());
    }

    append_history(&tx, &id, &snapshot.history, &now)?;
    tx.commit().map_err(store_err)?;
    Ok(1)
}

fn update_chat(conn: &mut Connection, snapshot: &SessionSnapshot) -> RelayResult<u64> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(store_err)?;
    let id = snapshot.id.to_string();
    let now = timestamp(Utc::now());
    let current = snapshot.current.as_ref();
    let expected = snapshot.version as i64;

    let updated = tx
        .execute(
            "UPDATE chat SET
                status = ?2, exchange_count = ?3, current_prompt = ?4,
                current_message_ref = ?5, current_reply = ?6, deleted = ?7,
                updated_at = ?8, version = version + 1
             WHERE id = ?1 AND version = ?9",
            params![
                id,
                snapshot.status.code(),
                i64::from(snapshot.exchange_count),
                current.map(|c| c.prompt.as_str()),
                current.map(|c| c.message_ref.as_str()),
                current.map(|c| c.reply.as_str()),
                i64::from(snapshot.status == SessionStatus::Ended),
                now,
                expected,
            ],
        )
        .map_err(store_err)?;

    if updated == 0 {
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM chat WHERE id = ?1", [&id], |row| row.get(0))
            .optional()
            .map_err(store_err)?;
        return Err(match exists {
            Some(_) => stale_version(),
            None => unknown_chat(snapshot.id),
        });
    }

    append_history(&tx, &id, &snapshot.history, &now)?;
    tx.commit().map_err(store_err)?;
    Ok(snapshot.version + 1)
}

// ---------------------------------------------------------------------------
// SqliteSessionStore
// ---------------------------------------------------------------------------

/// Session store on a single SQLite connection.
///
/// Every call runs on the blocking pool; the connection mutex serializes
/// them, and writes use immediate transactions.
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Opens (or creates) the database at `path` and applies migrations.
    pub fn open(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(store_err)?;
        migrate(&conn)?;
        info!(path = %path.display(), "Opened session database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> RelayResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(store_err)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> RelayResult<T>
    where
        F: FnOnce(&mut Connection) -> RelayResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| RelayError::Store(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn find_active(&self, identity: &Identity) -> RelayResult<Session> {
        let owner = identity.clone();
        let found = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {CHAT_COLUMNS} FROM chat
                             WHERE channel = ?1 AND channel_user_id = ?2 AND deleted = 0"
                        ),
                        params![owner.channel.code(), owner.user_id],
                        ChatRow::from_row,
                    )
                    .optional()
                    .map_err(store_err)?;
                load_session(conn, row)
            })
            .await?;
        found.ok_or_else(|| no_active_session(identity))
    }

    async fn find_by_id(&self, id: ChatId) -> RelayResult<Session> {
        let found = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {CHAT_COLUMNS} FROM chat WHERE id = ?1"),
                        [id.to_string()],
                        ChatRow::from_row,
                    )
                    .optional()
                    .map_err(store_err)?;
                load_session(conn, row)
            })
            .await?;
        found.ok_or_else(|| unknown_chat(id))
    }

    async fn save(&self, session: &mut Session) -> RelayResult<()> {
        let snapshot = session.snapshot();
        let chat_id = snapshot.id;
        let version = self
            .with_conn(move |conn| {
                if snapshot.version == 0 {
                    insert_chat(conn, &snapshot)
                } else {
                    update_chat(conn, &snapshot)
                }
            })
            .await?;
        debug!(chat_id = %chat_id, version, "Saved chat");
        session.mark_persisted(version);
        Ok(())
    }
}
