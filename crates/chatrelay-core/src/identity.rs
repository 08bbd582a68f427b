use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The messaging platform a user talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Telegram Bot API.
    Telegram,
    /// WeChat official account.
    Wechat,
    /// DingTalk robot.
    Dingtalk,
}

impl Channel {
    /// Stable integer code used by persistent stores.
    pub fn code(self) -> i64 {
        match self {
            Channel::Telegram => 1,
            Channel::Wechat => 2,
            Channel::Dingtalk => 3,
        }
    }

    /// Inverse of [`Channel::code`].
    pub fn from_code(code: i64) -> RelayResult<Self> {
        match code {
            1 => Ok(Channel::Telegram),
            2 => Ok(Channel::Wechat),
            3 => Ok(Channel::Dingtalk),
            other => Err(RelayError::Store(format!("unknown channel code {other}"))),
        }
    }

    /// Lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Wechat => "wechat",
            Channel::Dingtalk => "dingtalk",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user on a platform. Owns at most one active chat at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Platform the user writes from.
    pub channel: Channel,
    /// Opaque per-channel user identifier.
    pub user_id: String,
}

impl Identity {
    /// Creates a new identity.
    pub fn new(channel: Channel, user_id: impl Into<String>) -> Self {
        Self {
            channel,
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.user_id)
    }
}

/// Durable primary key of a chat.
///
/// Backed by a UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(Uuid);

impl ChatId {
    /// Generates a fresh, time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ChatId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ChatId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| RelayError::InvalidInput(format!("bad chat id '{s}': {e}")))
    }
}
