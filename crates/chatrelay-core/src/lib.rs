//! Core types and error definitions for chatrelay.
//!
//! This crate provides the foundational types shared across all chatrelay
//! crates: the error taxonomy and the identity of a conversation.
//!
//! # Main types
//!
//! - [`RelayError`]: Unified error enum for every chatrelay subsystem.
//! - [`RelayResult`]: Convenience alias for `Result<T, RelayError>`.
//! - [`Channel`]: The messaging platform a user talks through.
//! - [`Identity`]: `(Channel, user id)` pair owning at most one active chat.
//! - [`ChatId`]: Durable, time-sortable primary key of a chat.

/// Error taxonomy.
pub mod error;
/// Channel, identity and chat identifiers.
pub mod identity;

pub use error::{RelayError, RelayResult};
pub use identity::{Channel, ChatId, Identity};
