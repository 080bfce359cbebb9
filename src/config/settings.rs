//! Application settings and Telegram configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Telegram API credentials used when creating new profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub const fn new(api_id: i32, api_hash: String) -> Self {
        Self { api_id, api_hash }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        Ok(Self { api_id, api_hash })
    }
}

/// Where the broadcaster keeps its files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Path to the settings database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory holding one grammers session file per profile.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("broadcaster.db")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            sessions_dir: default_sessions_dir(),
        }
    }
}

impl BotSettings {
    /// Creates settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            database_path: std::env::var("BROADCASTER_DB")
                .map_or_else(|_| default_database_path(), PathBuf::from),
            sessions_dir: std::env::var("BROADCASTER_SESSIONS_DIR")
                .map_or_else(|_| default_sessions_dir(), PathBuf::from),
        }
    }

    /// Session file path for a phone number.
    #[must_use]
    pub fn session_path_for(&self, phone: &str) -> PathBuf {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        self.sessions_dir.join(format!("{digits}.session"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BotSettings::default();
        assert_eq!(settings.database_path, PathBuf::from("broadcaster.db"));
        assert_eq!(settings.sessions_dir, PathBuf::from("sessions"));
    }

    #[test]
    fn test_session_path_uses_phone_digits() {
        let settings = BotSettings::default();
        assert_eq!(
            settings.session_path_for("+7 (999) 123-45-67"),
            PathBuf::from("sessions/79991234567.session")
        );
    }

    #[test]
    fn test_telegram_config_new() {
        let config = TelegramConfig::new(12345, "abc123".to_owned());
        assert_eq!(config.api_id, 12345);
        assert_eq!(config.api_hash, "abc123");
    }
}
