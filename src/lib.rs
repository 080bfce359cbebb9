//! Group Broadcaster Library
//!
//! A multi-account Telegram userbot that broadcasts a message to groups on
//! a schedule and answers private messages and mentions.
//!
//! This crate provides the core functionality for:
//! - Persisting profiles, their settings and destinations
//! - Connecting accounts to Telegram via `MTProto`
//! - Resolving and caching destination references
//! - Running paced broadcast cycles with rate-limit backoff
//! - Auto-replies and the operator console

pub mod autoreply;
pub mod commands;
pub mod config;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod telegram;

#[cfg(test)]
mod testing;
