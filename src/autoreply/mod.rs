//! Automatic replies to private messages and group mentions.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::store::{ProfileSettings, SettingsStore};
use crate::telegram::{ChatKind, IncomingMessage, MessagingSession, truncate_for_log};

static MENTION_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]+)"));

/// Whether `text` mentions `@username`, ignoring case.
#[must_use]
pub fn mentions(text: &str, username: &str) -> bool {
    let Ok(pattern) = MENTION_PATTERN.as_ref() else {
        return false;
    };
    pattern
        .captures_iter(text)
        .any(|captures| captures[1].eq_ignore_ascii_case(username))
}

/// Picks the reply text for an incoming message, if any.
#[must_use]
pub fn decide_reply<'a>(
    settings: &'a ProfileSettings,
    message: &IncomingMessage,
    own_username: Option<&str>,
) -> Option<&'a str> {
    if message.outgoing {
        return None;
    }

    match message.chat_kind {
        ChatKind::Private if settings.auto_reply_enabled => Some(settings.auto_reply_text.as_str()),
        ChatKind::Group if settings.mention_reply_enabled => own_username
            .filter(|username| mentions(&message.text, username))
            .map(|_| settings.mention_reply_text.as_str()),
        _ => None,
    }
}

/// Consumes the incoming stream of one session and answers it.
pub struct AutoResponder {
    store: Arc<SettingsStore>,
    session: Arc<dyn MessagingSession>,
}

impl AutoResponder {
    #[must_use]
    pub fn new(store: Arc<SettingsStore>, session: Arc<dyn MessagingSession>) -> Self {
        Self { store, session }
    }

    /// Runs until the session's incoming stream ends.
    pub async fn run(self) {
        let profile_id = self.session.profile_id();

        let own_username = match self.session.own_username().await {
            Ok(username) => username,
            Err(e) => {
                warn!(
                    "Profile {}: could not read own username, mention replies disabled: {}",
                    profile_id, e
                );
                None
            }
        };
        info!(
            "Profile {}: auto-responder started (@{})",
            profile_id,
            own_username.as_deref().unwrap_or("-")
        );

        while let Some(message) = self.session.next_incoming().await {
            self.handle(&message, own_username.as_deref()).await;
        }

        info!("Profile {}: incoming stream closed", profile_id);
    }

    async fn handle(&self, message: &IncomingMessage, own_username: Option<&str>) {
        if message.outgoing {
            return;
        }
        let profile_id = self.session.profile_id();

        // Settings are read per message so operator changes apply at once.
        let settings = match self.store.get_settings(profile_id) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Profile {}: failed to load settings: {}", profile_id, e);
                return;
            }
        };

        let Some(reply) = decide_reply(&settings, message, own_username) else {
            return;
        };

        debug!(
            "Profile {}: replying to {} in chat {}: \"{}\"",
            profile_id,
            message.id,
            message.chat_id,
            truncate_for_log(reply, 30)
        );
        if let Err(e) = self.session.send_reply(message, reply).await {
            warn!(
                "Profile {}: failed to reply in chat {}: {}",
                profile_id, message.chat_id, e
            );
        }
    }
}

impl std::fmt::Debug for AutoResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoResponder")
            .field("profile_id", &self.session.profile_id())
            .finish_non_exhaustive()
    }
}
