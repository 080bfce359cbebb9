//! Parsing and normalisation of destination references.
//!
//! Operators paste links in many shapes (`@name`, `t.me/name`,
//! `https://t.me/+hash`, message links). Everything is reduced to one
//! canonical string before it reaches the store.

use std::fmt;

use thiserror::Error;

/// Errors returned when a reference cannot be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("Reference is empty")]
    Empty,

    #[error("Not a Telegram link or username: {0}")]
    Unrecognized(String),
}

/// A parsed destination locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DestinationRef {
    /// Public username, stored lowercase.
    Username(String),

    /// Private invite link hash.
    Invite(String),

    /// Bare channel id from a `t.me/c/<id>` link.
    ChannelId(i64),
}

const HOSTS: [&str; 3] = ["t.me/", "telegram.me/", "telegram.dog/"];

impl DestinationRef {
    /// Parses a user supplied reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a recognisable Telegram locator.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ReferenceError::Empty);
        }
        let unrecognized = || ReferenceError::Unrecognized(trimmed.to_owned());

        if let Some(name) = trimmed.strip_prefix('@') {
            return parse_username(name).ok_or_else(unrecognized);
        }

        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let without_www = without_scheme
            .strip_prefix("www.")
            .unwrap_or(without_scheme);

        let Some(path) = HOSTS
            .iter()
            .find_map(|host| strip_prefix_ignore_case(without_www, host))
        else {
            // A bare word is treated as a username.
            return parse_username(trimmed).ok_or_else(unrecognized);
        };

        let path = path.split(['?', '#']).next().unwrap_or_default();
        let path = path.trim_end_matches('/');

        if let Some(hash) = path.strip_prefix('+') {
            return parse_invite(hash).ok_or_else(unrecognized);
        }
        if let Some(hash) = path.strip_prefix("joinchat/") {
            return parse_invite(hash).ok_or_else(unrecognized);
        }
        if let Some(rest) = path.strip_prefix("c/") {
            let id = rest.split('/').next().unwrap_or_default();
            return id
                .parse::<i64>()
                .ok()
                .filter(|id| *id > 0)
                .map(Self::ChannelId)
                .ok_or_else(unrecognized);
        }

        // Message links such as t.me/name/123 point at the chat itself.
        let name = path.split('/').next().unwrap_or_default();
        parse_username(name).ok_or_else(unrecognized)
    }

    /// Returns the canonical `https://t.me/...` form.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Username(name) => format!("https://t.me/{name}"),
            Self::Invite(hash) => format!("https://t.me/+{hash}"),
            Self::ChannelId(id) => format!("https://t.me/c/{id}"),
        }
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Parses a reference and returns its canonical form.
///
/// # Errors
///
/// Returns an error if the input is not a recognisable Telegram locator.
pub fn normalize_reference(input: &str) -> Result<String, ReferenceError> {
    DestinationRef::parse(input).map(|reference| reference.canonical())
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn parse_username(name: &str) -> Option<DestinationRef> {
    let mut chars = name.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && (3..=32).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| DestinationRef::Username(name.to_ascii_lowercase()))
}

fn parse_invite(hash: &str) -> Option<DestinationRef> {
    let valid = !hash.is_empty()
        && hash
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then(|| DestinationRef::Invite(hash.to_owned()))
}
