//! Channel side of chatrelay.
//!
//! Turns session events into messages on the user's messaging platform.
//!
//! # Main types
//!
//! - [`TelegramClient`]: Outbound Telegram Bot API calls.
//! - [`TelegramNotifier`]: Dispatcher subscriber for Telegram chats.
//! - [`MessageRef`]: `"{message_id}@{chat_id}"` reference to an inbound message.

/// Event rendering and the Telegram subscriber.
pub mod notifier;
/// Telegram Bot API client and webhook payload types.
pub mod telegram;

pub use notifier::{render, Outgoing, TelegramNotifier, TEXT_ENDED, TEXT_INTERRUPTED, TEXT_STARTED};
pub use telegram::{MessageRef, TelegramClient, Update, DEFAULT_API_BASE};
