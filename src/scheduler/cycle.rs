//! One broadcast cycle of one profile.
//!
//! A cycle walks the destination list in insertion order and sends the
//! broadcast text to each entry through the pacer:
//! 1. Resolve the reference (cached)
//! 2. Send; on `WriteForbidden` join the linked discussion chat and retry once
//! 3. Rate limits abort the cycle and leave a resume cursor
//! 4. Permanent failures leave the chat and drop the destination
//! 5. Unclassified failures count strikes until the configured limit

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{CycleOutcome, SendPacer, instant_after};
use crate::resolver::DestinationResolver;
use crate::store::{ProfileId, RemoveOutcome, SettingsStore};
use crate::telegram::{EntityHandle, MessagingSession, SessionError, truncate_for_log};

/// Failure handling knobs of a cycle.
#[derive(Debug, Clone, Copy)]
pub struct CyclePolicy {
    /// Added on top of every provider-requested wait.
    pub rate_limit_margin: Duration,

    /// Unclassified failures tolerated before a destination is dropped.
    pub unclassified_error_strikes: u32,
}

impl Default for CyclePolicy {
    fn default() -> Self {
        Self {
            rate_limit_margin: Duration::from_secs(2),
            unclassified_error_strikes: 1,
        }
    }
}

/// What a cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub profile_id: ProfileId,
    pub sent: usize,
    pub removed: Vec<String>,

    /// Strike counts to carry into the next cycle.
    pub strikes: HashMap<String, u32>,

    pub outcome: CycleOutcome,
}

/// Result of one delivery attempt.
#[derive(Debug)]
enum Delivery {
    Sent,
    RateLimited(u32),
    Permanent {
        handle: Option<EntityHandle>,
        error: SessionError,
    },
    Unclassified {
        handle: Option<EntityHandle>,
        error: SessionError,
    },
    /// The session lost its authorization; nothing else will succeed.
    Unauthorized,
}

/// Everything a cycle task needs, owned so it can be spawned.
#[derive(Clone)]
pub struct BroadcastCycle {
    pub profile_id: ProfileId,
    pub store: Arc<SettingsStore>,
    pub resolver: Arc<DestinationResolver>,
    pub session: Arc<dyn MessagingSession>,
    pub pacer: Arc<SendPacer>,
    pub policy: CyclePolicy,
}

impl BroadcastCycle {
    /// Runs the cycle.
    ///
    /// `resume_at` is the destination a rate-limited cycle stopped at.
    pub async fn run(
        self,
        resume_at: Option<String>,
        mut strikes: HashMap<String, u32>,
    ) -> CycleReport {
        let mut report = CycleReport {
            profile_id: self.profile_id,
            sent: 0,
            removed: Vec::new(),
            strikes: HashMap::new(),
            outcome: CycleOutcome::Completed,
        };

        let settings = match self.store.get_settings(self.profile_id) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Profile {}: failed to load settings: {}", self.profile_id, e);
                report.strikes = strikes;
                report.outcome = CycleOutcome::Failed(e.to_string());
                return report;
            }
        };

        if !settings.broadcast_enabled {
            debug!("Profile {}: broadcast disabled", self.profile_id);
            report.strikes = strikes;
            report.outcome = CycleOutcome::Disabled;
            return report;
        }

        let destinations = match self.store.list_destinations(self.profile_id) {
            Ok(destinations) => destinations,
            Err(e) => {
                error!(
                    "Profile {}: failed to load destinations: {}",
                    self.profile_id, e
                );
                report.strikes = strikes;
                report.outcome = CycleOutcome::Failed(e.to_string());
                return report;
            }
        };

        strikes.retain(|reference, _| destinations.contains(reference));
        self.pacer.set_rate(settings.messages_per_minute).await;

        let start = resume_at
            .and_then(|cursor| destinations.iter().position(|d| *d == cursor))
            .unwrap_or(0);

        info!(
            "Profile {}: starting cycle over {} destinations (from #{})",
            self.profile_id,
            destinations.len(),
            start + 1
        );

        for reference in &destinations[start..] {
            self.pacer.wait_and_acquire().await;

            // The operator may have removed it while this cycle was waiting.
            match self.store.has_destination(self.profile_id, reference) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        "Profile {}: {} was removed, skipping",
                        self.profile_id, reference
                    );
                    strikes.remove(reference);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Profile {}: could not check {}, skipping: {}",
                        self.profile_id, reference, e
                    );
                    continue;
                }
            }

            match self.deliver(reference, &settings.broadcast_text).await {
                Delivery::Sent => {
                    report.sent += 1;
                    strikes.remove(reference);
                }
                Delivery::RateLimited(wait_secs) => {
                    let wait = Duration::from_secs(u64::from(wait_secs));
                    warn!(
                        "Profile {}: rate limited at {}, backing off {}s",
                        self.profile_id, reference, wait_secs
                    );
                    report.strikes = strikes;
                    report.outcome = CycleOutcome::RateLimited {
                        wait_secs,
                        until: instant_after(
                            Instant::now(),
                            wait.saturating_add(self.policy.rate_limit_margin),
                        ),
                        resume_at: reference.clone(),
                    };
                    return report;
                }
                Delivery::Permanent { handle, error } => {
                    self.drop_destination(reference, handle.as_ref(), &error).await;
                    strikes.remove(reference);
                    report.removed.push(reference.clone());
                }
                Delivery::Unclassified { handle, error } => {
                    let count = strikes.entry(reference.clone()).or_insert(0);
                    *count += 1;
                    if *count >= self.policy.unclassified_error_strikes {
                        strikes.remove(reference);
                        self.drop_destination(reference, handle.as_ref(), &error).await;
                        report.removed.push(reference.clone());
                    } else {
                        warn!(
                            "Profile {}: {} failed ({}), strike {}/{}",
                            self.profile_id,
                            reference,
                            error,
                            count,
                            self.policy.unclassified_error_strikes
                        );
                    }
                }
                Delivery::Unauthorized => {
                    error!("Profile {}: session is no longer authorized", self.profile_id);
                    report.strikes = strikes;
                    report.outcome = CycleOutcome::Failed(SessionError::NotAuthorized.to_string());
                    return report;
                }
            }
        }

        info!(
            "Profile {}: cycle complete, {} sent, {} removed",
            self.profile_id,
            report.sent,
            report.removed.len()
        );
        report.strikes = strikes;
        report
    }

    async fn deliver(&self, reference: &str, text: &str) -> Delivery {
        let handle = match self.resolver.resolve(self.session.as_ref(), reference).await {
            Ok(handle) => handle,
            Err(error) => return classify(None, error),
        };

        match self.session.send_message(&handle, text).await {
            Ok(_) => {
                debug!(
                    "Profile {}: sent \"{}\" to {}",
                    self.profile_id,
                    truncate_for_log(text, 30),
                    reference
                );
                Delivery::Sent
            }
            Err(SessionError::WriteForbidden) => self.retry_via_linked(handle, text).await,
            Err(error) => classify(Some(handle), error),
        }
    }

    /// Joins the discussion chat linked to `handle` and retries once.
    async fn retry_via_linked(&self, handle: EntityHandle, text: &str) -> Delivery {
        let forbidden = |handle| Delivery::Permanent {
            handle: Some(handle),
            error: SessionError::WriteForbidden,
        };

        let linked = match self.session.linked_discussion_channel(&handle).await {
            Ok(Some(linked)) => linked,
            Ok(None) => return forbidden(handle),
            Err(SessionError::RateLimited(wait)) => return Delivery::RateLimited(wait),
            Err(e) => {
                debug!("Profile {}: linked chat lookup failed: {}", self.profile_id, e);
                return forbidden(handle);
            }
        };

        info!(
            "Profile {}: joining linked chat {} of {}",
            self.profile_id, linked.title, handle.title
        );
        match self.session.join_destination(&linked).await {
            Ok(()) => {}
            Err(SessionError::RateLimited(wait)) => return Delivery::RateLimited(wait),
            Err(e) => {
                warn!("Profile {}: failed to join linked chat: {}", self.profile_id, e);
                return forbidden(handle);
            }
        }

        self.pacer.wait_and_acquire().await;
        match self.session.send_message(&handle, text).await {
            Ok(_) => Delivery::Sent,
            Err(SessionError::RateLimited(wait)) => Delivery::RateLimited(wait),
            Err(SessionError::NotAuthorized) => Delivery::Unauthorized,
            Err(error) => Delivery::Permanent {
                handle: Some(handle),
                error,
            },
        }
    }

    /// Leaves the chat (best effort), removes it from the store and the cache.
    async fn drop_destination(
        &self,
        reference: &str,
        handle: Option<&EntityHandle>,
        reason: &SessionError,
    ) {
        warn!(
            "Profile {}: removing {} ({})",
            self.profile_id, reference, reason
        );

        if let Some(handle) = handle
            && let Err(e) = self.session.leave_destination(handle).await
        {
            debug!("Profile {}: failed to leave {}: {}", self.profile_id, reference, e);
        }

        match self.store.remove_destination(self.profile_id, reference) {
            Ok(RemoveOutcome::Removed | RemoveOutcome::NotFound) => {}
            Err(e) => error!(
                "Profile {}: failed to remove {} from store: {}",
                self.profile_id, reference, e
            ),
        }
        self.resolver.invalidate(self.profile_id, reference);
    }
}

fn classify(handle: Option<EntityHandle>, error: SessionError) -> Delivery {
    match error {
        SessionError::RateLimited(wait) => Delivery::RateLimited(wait),
        SessionError::NotAuthorized => Delivery::Unauthorized,
        SessionError::WriteForbidden
        | SessionError::EntityPrivate
        | SessionError::Banned
        | SessionError::NotFound(_) => Delivery::Permanent { handle, error },
        SessionError::Other(_) => Delivery::Unclassified { handle, error },
    }
}

impl std::fmt::Debug for BroadcastCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastCycle")
            .field("profile_id", &self.profile_id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
