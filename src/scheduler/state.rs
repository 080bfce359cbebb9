//! Per-profile scheduler state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::SendPacer;
use crate::store::ProfileId;

/// Used when `Instant + Duration` would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + wait`, clamped to a far-future instant instead of overflowing.
#[must_use]
pub fn instant_after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Active rate-limit backoff of a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    /// No cycle starts before this instant.
    pub until: Instant,

    /// Wait the provider asked for.
    pub wait_secs: u32,

    /// When the backoff started.
    pub since: DateTime<Utc>,

    /// Destination the next cycle starts at.
    pub resume_at: String,
}

impl BackoffState {
    /// Whether the backoff is still in force at `now`.
    #[must_use]
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.until
    }

    /// Time left until the backoff expires.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.until.saturating_duration_since(now)
    }

    fn status(&self, now: Instant) -> BackoffStatus {
        BackoffStatus {
            wait_secs: self.wait_secs,
            since: self.since,
            remaining: self.remaining(now),
            resume_at: self.resume_at.clone(),
        }
    }
}

/// Backoff details shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffStatus {
    pub wait_secs: u32,
    pub since: DateTime<Utc>,
    pub remaining: Duration,
    pub resume_at: String,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every destination was attempted.
    Completed,

    /// Broadcasting was disabled when the cycle started.
    Disabled,

    /// The provider asked to slow down; the rest of the cycle was skipped.
    RateLimited {
        wait_secs: u32,
        until: Instant,
        resume_at: String,
    },

    /// The cycle could not run at all.
    Failed(String),
}

impl CycleOutcome {
    /// Short label for status output.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Completed => "completed".to_owned(),
            Self::Disabled => "disabled".to_owned(),
            Self::RateLimited { wait_secs, .. } => format!("rate limited ({wait_secs}s)"),
            Self::Failed(reason) => format!("failed: {reason}"),
        }
    }
}

/// Counters reported by the `status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileStats {
    pub total_sent: u64,
    pub total_removed: u64,
    pub cycles: u64,
    pub last_outcome: Option<CycleOutcome>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Snapshot of one profile's scheduling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStatus {
    pub profile_id: ProfileId,
    pub connected: bool,
    pub in_flight: bool,
    pub backoff: Option<BackoffStatus>,
    pub next_cycle_in: Option<Duration>,
    pub stats: ProfileStats,
}

/// Mutable scheduling state of one profile.
#[derive(Debug)]
pub struct ProfileRunState {
    /// Pacer shared by all cycles so spacing holds across cycle boundaries.
    pub pacer: Arc<SendPacer>,

    pub backoff: Option<BackoffState>,

    /// Earliest start of the next regular cycle. `None` means now.
    pub next_cycle_at: Option<Instant>,

    /// Interval captured when the running cycle started.
    pub interval: Duration,

    /// Consecutive unclassified failures per destination.
    pub strikes: HashMap<String, u32>,

    pub stats: ProfileStats,
}

impl ProfileRunState {
    /// Creates the state of a profile seen for the first time.
    #[must_use]
    pub fn new(messages_per_minute: u32, jitter: Duration) -> Self {
        Self {
            pacer: Arc::new(SendPacer::new(messages_per_minute, jitter)),
            backoff: None,
            next_cycle_at: None,
            interval: Duration::ZERO,
            strikes: HashMap::new(),
            stats: ProfileStats::default(),
        }
    }

    /// Whether a new cycle may start at `now`.
    ///
    /// Expired backoffs are kept so the resume cursor survives until the
    /// next cycle picks it up.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        if self.backoff.as_ref().is_some_and(|b| b.is_active(now)) {
            return false;
        }
        self.next_cycle_at.is_none_or(|at| now >= at)
    }

    /// Takes the resume cursor of an expired backoff.
    pub fn take_resume_cursor(&mut self, now: Instant) -> Option<String> {
        match &self.backoff {
            Some(backoff) if !backoff.is_active(now) => {
                self.backoff.take().map(|backoff| backoff.resume_at)
            }
            _ => None,
        }
    }

    /// Records the end of a cycle and schedules the next one.
    pub fn finish_cycle(&mut self, outcome: CycleOutcome, now: Instant) {
        self.stats.cycles += 1;
        self.stats.last_cycle_at = Some(Utc::now());

        match &outcome {
            CycleOutcome::Completed => {
                self.next_cycle_at = Some(instant_after(now, self.interval));
            }
            CycleOutcome::Disabled => {
                self.next_cycle_at = None;
            }
            CycleOutcome::RateLimited {
                wait_secs,
                until,
                resume_at,
            } => {
                self.backoff = Some(BackoffState {
                    until: *until,
                    wait_secs: *wait_secs,
                    since: Utc::now(),
                    resume_at: resume_at.clone(),
                });
                self.next_cycle_at = None;
            }
            CycleOutcome::Failed(reason) => {
                self.stats.last_error = Some(reason.clone());
                self.next_cycle_at = Some(instant_after(now, self.interval));
            }
        }

        self.stats.last_outcome = Some(outcome);
    }

    /// Builds a status snapshot.
    #[must_use]
    pub fn status(
        &self,
        profile_id: ProfileId,
        connected: bool,
        in_flight: bool,
        now: Instant,
    ) -> ProfileStatus {
        ProfileStatus {
            profile_id,
            connected,
            in_flight,
            backoff: self
                .backoff
                .as_ref()
                .filter(|b| b.is_active(now))
                .map(|b| b.status(now)),
            next_cycle_in: self
                .next_cycle_at
                .map(|at| at.saturating_duration_since(now)),
            stats: self.stats.clone(),
        }
    }
}
