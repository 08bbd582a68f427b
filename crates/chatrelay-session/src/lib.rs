//! Chat sessions for chatrelay.
//!
//! A [`Session`] is the aggregate root of one conversation between an
//! [`Identity`](chatrelay_core::Identity) and the completion service. Its
//! transitions are pure: they validate, mutate, and record a
//! [`SessionEvent`] in the session's pending buffer. Persisting is the job of
//! a [`SessionStore`]; fanning the recorded events out to subscribers is the
//! job of the [`Dispatcher`].
//!
//! # Main types
//!
//! - [`Session`] / [`SessionSnapshot`]: The aggregate and its stored form.
//! - [`SessionEvent`] / [`EventKind`]: Closed set of domain events.
//! - [`SessionPolicy`]: History cap and maximum age.
//! - [`SessionStore`]: Optimistic-concurrency persistence port, with
//!   [`MemorySessionStore`] and (feature `sqlite`) [`SqliteSessionStore`].
//! - [`Dispatcher`] / [`EventHandler`]: Ordered per-chat event delivery.

/// Event routing to subscribers.
pub mod dispatcher;
/// Domain events.
pub mod event;
/// Expiry limits.
pub mod policy;
/// The session aggregate.
pub mod session;
/// SQLite-backed store.
#[cfg(feature = "sqlite")]
pub mod sqlite;
/// Persistence port and the in-memory store.
pub mod store;

pub use dispatcher::{
    Dispatcher, DispatcherBuilder, EventHandler, DEFAULT_LANES, DEFAULT_QUEUE_CAPACITY,
};
pub use event::{EventCollection, EventKind, EventOrigin, SessionEvent};
pub use policy::{ExpiryReason, SessionPolicy, DEFAULT_EXPIRY_HOURS, DEFAULT_MAX_EXCHANGES};
pub use session::{Exchange, Session, SessionSnapshot, SessionStatus, CAUSE_SHUTDOWN};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;
pub use store::{MemorySessionStore, SessionStore};
