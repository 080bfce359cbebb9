//! Configuration module for the broadcaster.
//!
//! Handles environment settings, Telegram API credentials and the
//! scheduler configuration file.

mod scheduler;
mod settings;

pub use scheduler::{SchedulerConfig, ValidationError};
pub use settings::{BotSettings, ConfigError, TelegramConfig};
