//! Telegram session module.
//!
//! Defines the messaging session contract the broadcast core depends on and
//! the grammers-backed implementation used at runtime.

mod client;
mod error;
mod session;

pub use client::{TelegramError, TelegramSession, mask_phone, truncate_for_log};
pub use error::SessionError;
pub use session::{
    ChatKind, EntityHandle, EntityKind, IncomingMessage, MessageId, MessagingSession,
};
