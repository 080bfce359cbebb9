//! Per-profile send pacing.
//!
//! Keeps consecutive sends at least `60 / messages_per_minute` seconds apart
//! and never lets more than `messages_per_minute` sends into any rolling
//! 60-second window.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Length of the rolling window.
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct PacerState {
    messages_per_minute: u32,

    /// Start times of the sends inside the current window, oldest first.
    recent: VecDeque<Instant>,
}

impl PacerState {
    fn spacing(&self) -> Duration {
        WINDOW / self.messages_per_minute.max(1)
    }

    fn prune(&mut self, now: Instant) {
        while self
            .recent
            .front()
            .is_some_and(|sent| now.duration_since(*sent) >= WINDOW)
        {
            self.recent.pop_front();
        }
    }

    fn time_until_allowed(&mut self, now: Instant) -> Duration {
        self.prune(now);

        let after_last = self
            .recent
            .back()
            .map(|last| (*last + self.spacing()).saturating_duration_since(now))
            .unwrap_or_default();

        let window_full = self.recent.len() >= self.messages_per_minute.max(1) as usize;
        let after_window = if window_full {
            self.recent
                .front()
                .map(|oldest| (*oldest + WINDOW).saturating_duration_since(now))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };

        after_last.max(after_window)
    }
}

/// Rate pacer shared by every cycle of one profile.
#[derive(Debug)]
pub struct SendPacer {
    state: Mutex<PacerState>,

    /// Upper bound of the random delay added to each wait.
    jitter: Duration,
}

impl SendPacer {
    /// Creates a pacer allowing `messages_per_minute` sends per minute.
    #[must_use]
    pub fn new(messages_per_minute: u32, jitter: Duration) -> Self {
        Self {
            state: Mutex::new(PacerState {
                messages_per_minute,
                recent: VecDeque::new(),
            }),
            jitter,
        }
    }

    /// Applies a new rate. Sends already recorded keep counting.
    pub async fn set_rate(&self, messages_per_minute: u32) {
        let mut state = self.state.lock().await;
        if state.messages_per_minute != messages_per_minute {
            debug!(
                "Pacer rate changed from {} to {} per minute",
                state.messages_per_minute, messages_per_minute
            );
            state.messages_per_minute = messages_per_minute;
        }
    }

    /// Waits until a send is allowed, then records it.
    ///
    /// Returns the duration waited.
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut state = self.state.lock().await;

        let wait = state.time_until_allowed(Instant::now()) + self.random_jitter();
        if !wait.is_zero() {
            debug!("Pacer: waiting {:?} before next send", wait);
            tokio::time::sleep(wait).await;
        }

        let now = Instant::now();
        state.prune(now);
        state.recent.push_back(now);
        wait
    }

    /// Returns the time remaining until the next send is allowed.
    pub async fn time_until_allowed(&self) -> Duration {
        self.state.lock().await.time_until_allowed(Instant::now())
    }

    fn random_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
