//! Profile, settings and destination types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted pause between two cycles.
pub const MAX_SEND_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Errors produced by the settings store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Profile not found: {0}")]
    NotFound(ProfileId),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

/// Store-assigned identifier of a managed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(pub i64);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfileId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(Self)
    }
}

/// Per-profile behaviour settings. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// Reply automatically to private messages.
    pub auto_reply_enabled: bool,

    /// Text used for private auto-replies.
    pub auto_reply_text: String,

    /// Reply when the account is mentioned in a group.
    pub mention_reply_enabled: bool,

    /// Text used for group mention replies.
    pub mention_reply_text: String,

    /// Message pushed to every destination on each broadcast cycle.
    pub broadcast_text: String,

    /// Whether the scheduler broadcasts for this profile at all.
    pub broadcast_enabled: bool,

    /// Upper bound of attempted sends per rolling minute.
    pub messages_per_minute: u32,

    /// Pause between two broadcast cycles, in seconds.
    pub send_interval_secs: u64,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            auto_reply_enabled: true,
            auto_reply_text: "Hello! This is an automatic reply.".to_owned(),
            mention_reply_enabled: false,
            mention_reply_text: "Automatic reply in group.".to_owned(),
            broadcast_text: "📢 This is an automatic message!".to_owned(),
            broadcast_enabled: false,
            messages_per_minute: 30,
            send_interval_secs: 60,
        }
    }
}

impl ProfileSettings {
    /// Checks the numeric and text invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), StoreError> {
        let updates = [
            SettingUpdate::AutoReplyText(self.auto_reply_text.clone()),
            SettingUpdate::MentionReplyText(self.mention_reply_text.clone()),
            SettingUpdate::BroadcastText(self.broadcast_text.clone()),
            SettingUpdate::MessagesPerMinute(self.messages_per_minute),
            SettingUpdate::SendIntervalSecs(self.send_interval_secs),
        ];
        updates.iter().try_for_each(SettingUpdate::validate)
    }
}

/// A stored, logged-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: ProfileId,

    /// Telegram API ID the session was created with.
    pub api_id: i32,

    /// Telegram API hash the session was created with.
    pub api_hash: String,

    /// Phone number, used for display only.
    pub phone: String,

    /// Path to the grammers session database of this account.
    pub session_path: PathBuf,

    pub created_at: DateTime<Utc>,

    pub settings: ProfileSettings,
}

/// Data needed to register a profile after a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: String,
    pub session_path: PathBuf,
}

/// A single-field settings mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingUpdate {
    AutoReplyEnabled(bool),
    AutoReplyText(String),
    MentionReplyEnabled(bool),
    MentionReplyText(String),
    BroadcastText(String),
    BroadcastEnabled(bool),
    MessagesPerMinute(u32),
    SendIntervalSecs(u64),
}

impl SettingUpdate {
    /// Column of the `profiles` table holding this field.
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::AutoReplyEnabled(_) => "auto_reply_enabled",
            Self::AutoReplyText(_) => "auto_reply_text",
            Self::MentionReplyEnabled(_) => "mention_reply_enabled",
            Self::MentionReplyText(_) => "mention_reply_text",
            Self::BroadcastText(_) => "broadcast_text",
            Self::BroadcastEnabled(_) => "broadcast_enabled",
            Self::MessagesPerMinute(_) => "messages_per_minute",
            Self::SendIntervalSecs(_) => "send_interval_secs",
        }
    }

    /// Validates the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidValue`] for empty texts and zero rates.
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: &str| {
            Err(StoreError::InvalidValue {
                field: self.column(),
                reason: reason.to_owned(),
            })
        };

        match self {
            Self::AutoReplyText(text) | Self::MentionReplyText(text) | Self::BroadcastText(text)
                if text.trim().is_empty() =>
            {
                invalid("text cannot be empty")
            }
            Self::MessagesPerMinute(0) => invalid("must be a positive number"),
            Self::SendIntervalSecs(0) => invalid("must be a positive number of seconds"),
            Self::SendIntervalSecs(secs) if *secs > MAX_SEND_INTERVAL_SECS => {
                invalid("interval cannot exceed one week")
            }
            _ => Ok(()),
        }
    }
}

/// Result of inserting one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

/// Result of removing a destination or a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Counters for a batch destination insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddSummary {
    pub added: usize,
    pub already_present: usize,
}
