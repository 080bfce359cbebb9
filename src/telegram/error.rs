//! Failure taxonomy of messaging sessions.

use grammers_client::InvocationError;
use thiserror::Error;

/// Fallback wait when the provider asks to slow down without saying how long.
const DEFAULT_WAIT_SECS: u32 = 60;

/// Errors a messaging session surfaces to the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Writing to this chat is forbidden")]
    WriteForbidden,

    #[error("Chat is private or no longer accessible")]
    EntityPrivate,

    #[error("Account is banned in this chat")]
    Banned,

    #[error("Rate limited: retry in {0} seconds")]
    RateLimited(u32),

    #[error("Destination not found: {0}")]
    NotFound(String),

    #[error("Session is not authorized")]
    NotAuthorized,

    #[error("Provider error: {0}")]
    Other(String),
}

impl SessionError {
    /// Classifies a provider RPC error by its name and numeric value.
    #[must_use]
    pub fn from_rpc(name: &str, value: Option<u32>) -> Self {
        let (base, embedded) = split_trailing_number(name);
        let value = value.or(embedded);

        match base {
            "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" | "SLOWMODE_WAIT" | "FLOOD_TEST_PHONE_WAIT" => {
                Self::RateLimited(value.unwrap_or(DEFAULT_WAIT_SECS))
            }
            "CHAT_WRITE_FORBIDDEN"
            | "CHAT_SEND_PLAIN_FORBIDDEN"
            | "CHAT_GUEST_SEND_FORBIDDEN"
            | "CHAT_ADMIN_REQUIRED"
            | "CHAT_RESTRICTED"
            | "TOPIC_CLOSED" => Self::WriteForbidden,
            "CHANNEL_PRIVATE" | "CHANNEL_PUBLIC_GROUP_NA" | "CHAT_FORBIDDEN" => Self::EntityPrivate,
            "USER_BANNED_IN_CHANNEL" | "USER_KICKED" => Self::Banned,
            "USERNAME_NOT_OCCUPIED"
            | "USERNAME_INVALID"
            | "INVITE_HASH_EXPIRED"
            | "INVITE_HASH_INVALID"
            | "INVITE_HASH_EMPTY"
            | "CHANNEL_INVALID"
            | "CHAT_ID_INVALID"
            | "PEER_ID_INVALID" => Self::NotFound(base.to_owned()),
            "AUTH_KEY_UNREGISTERED" | "SESSION_REVOKED" | "USER_DEACTIVATED" => {
                Self::NotAuthorized
            }
            _ => Self::Other(name.to_owned()),
        }
    }
}

impl From<InvocationError> for SessionError {
    fn from(err: InvocationError) -> Self {
        if let InvocationError::Rpc(rpc) = &err {
            return Self::from_rpc(&rpc.name, rpc.value);
        }

        let err_str = err.to_string();
        extract_flood_wait_seconds(&err_str)
            .map_or_else(|| Self::Other(err_str), Self::RateLimited)
    }
}

/// Splits `FLOOD_WAIT_120` into `("FLOOD_WAIT", Some(120))`.
fn split_trailing_number(name: &str) -> (&str, Option<u32>) {
    match name.rsplit_once('_') {
        Some((base, digits)) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            (base, digits.parse().ok())
        }
        _ => (name, None),
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let lower = err_msg.to_lowercase();
    let patterns = ["flood_wait_", "flood wait "];

    for pattern in patterns {
        if let Some(idx) = lower.find(pattern) {
            let start = idx + pattern.len();
            let num_str: String = lower[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}
