use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Default number of completed exchanges after which a chat ends.
pub const DEFAULT_MAX_EXCHANGES: usize = 20;

/// Default chat lifetime, in hours.
pub const DEFAULT_EXPIRY_HOURS: i64 = 12;

/// Limits after which an idle chat is ended automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// History length that ends the chat.
    pub max_exchanges: usize,
    /// Age that ends the chat, measured from creation.
    pub expiry: TimeDelta,
}

impl SessionPolicy {
    /// Creates a policy with explicit limits.
    pub fn new(max_exchanges: usize, expiry: TimeDelta) -> Self {
        Self {
            max_exchanges,
            expiry,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_exchanges: DEFAULT_MAX_EXCHANGES,
            expiry: TimeDelta::hours(DEFAULT_EXPIRY_HOURS),
        }
    }
}

/// Which limit of a [`SessionPolicy`] ended a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// History reached `max_exchanges`.
    HistoryCap,
    /// The chat outlived `expiry`.
    Age,
}
