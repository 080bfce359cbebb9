//! Broadcast scheduler runner.
//!
//! The scheduler ticks at a fixed interval and, for every stored profile:
//! 1. Skips it if broadcasting is off, it has no session, or a cycle is running
//! 2. Skips it while a rate-limit backoff or the send interval is pending
//! 3. Otherwise spawns a cycle task for it
//!
//! Finished cycle tasks are collected on the next tick and their outcome
//! decides when the profile runs again. Profiles never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, interval};
use tracing::{debug, error, info, warn};

use super::{
    BroadcastCycle, CycleOutcome, CyclePolicy, CycleReport, ProfileRunState, ProfileStatus,
    instant_after,
};
use crate::config::SchedulerConfig;
use crate::resolver::DestinationResolver;
use crate::store::{ProfileId, SettingsStore};
use crate::telegram::MessagingSession;

/// Messages that can be sent to the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerMessage {
    /// Start a cycle for the profile as soon as nothing else prevents it.
    TriggerCycle(ProfileId),
    /// Stop the scheduler.
    Shutdown,
}

/// Multi-profile broadcast scheduler.
pub struct BroadcastScheduler {
    store: Arc<SettingsStore>,

    resolver: Arc<DestinationResolver>,

    /// Connected sessions by profile.
    sessions: RwLock<HashMap<ProfileId, Arc<dyn MessagingSession>>>,

    profiles: Mutex<HashMap<ProfileId, ProfileRunState>>,

    /// Running cycle tasks, at most one per profile.
    cycles: Mutex<HashMap<ProfileId, JoinHandle<CycleReport>>>,

    policy: CyclePolicy,

    jitter: Duration,

    tick_interval: Duration,

    shutdown_grace: Duration,
}

impl BroadcastScheduler {
    /// Creates a new broadcast scheduler.
    #[must_use]
    pub fn new(
        store: Arc<SettingsStore>,
        resolver: Arc<DestinationResolver>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            sessions: RwLock::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            cycles: Mutex::new(HashMap::new()),
            policy: CyclePolicy {
                rate_limit_margin: config.rate_limit_margin(),
                unclassified_error_strikes: config.unclassified_error_strikes,
            },
            jitter: config.send_jitter(),
            tick_interval: config.tick_interval(),
            shutdown_grace: config.shutdown_grace(),
        }
    }

    /// Makes a connected session available to the scheduler.
    pub fn register_session(&self, session: Arc<dyn MessagingSession>) {
        let profile_id = session.profile_id();
        info!("Profile {}: session registered", profile_id);
        self.sessions.write().insert(profile_id, session);
    }

    /// Returns the session of a profile, if connected.
    #[must_use]
    pub fn session(&self, profile_id: ProfileId) -> Option<Arc<dyn MessagingSession>> {
        self.sessions.read().get(&profile_id).cloned()
    }

    /// Profiles with a connected session.
    #[must_use]
    pub fn connected_profiles(&self) -> Vec<ProfileId> {
        let mut ids: Vec<ProfileId> = self.sessions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Forgets a profile: aborts its cycle, drops its state and cache
    /// entries, and disconnects its session.
    pub fn remove_profile(&self, profile_id: ProfileId) {
        if let Some(handle) = self.cycles.lock().remove(&profile_id) {
            handle.abort();
        }
        self.profiles.lock().remove(&profile_id);
        self.resolver.invalidate_profile(profile_id);

        let session = self.sessions.write().remove(&profile_id);
        if let Some(session) = session {
            session.disconnect();
        }
        info!("Profile {}: removed from scheduler", profile_id);
    }

    /// Clears the inter-cycle wait of a profile. Backoffs still apply.
    pub fn trigger(&self, profile_id: ProfileId) {
        if let Some(state) = self.profiles.lock().get_mut(&profile_id) {
            state.next_cycle_at = None;
        }
    }

    /// Status snapshot of one profile.
    #[must_use]
    pub fn status(&self, profile_id: ProfileId) -> ProfileStatus {
        let now = Instant::now();
        let connected = self.sessions.read().contains_key(&profile_id);
        let in_flight = self.cycles.lock().contains_key(&profile_id);

        match self.profiles.lock().get(&profile_id) {
            Some(state) => state.status(profile_id, connected, in_flight, now),
            None => ProfileStatus {
                profile_id,
                connected,
                in_flight,
                backoff: None,
                next_cycle_in: None,
                stats: super::ProfileStats::default(),
            },
        }
    }

    /// Runs the scheduler loop until shutdown.
    pub async fn run(&self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        info!(
            "Broadcast scheduler started (tick {:?})",
            self.tick_interval
        );

        let mut tick_timer = interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    self.tick().await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerMessage::TriggerCycle(profile_id)) => {
                            debug!("Received trigger for profile {}", profile_id);
                            self.trigger(profile_id);
                            self.tick().await;
                        }
                        Some(SchedulerMessage::Shutdown) | None => {
                            info!("Scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Single pass of the scheduler: collect finished cycles, start due ones.
    pub async fn tick(&self) {
        let finished: Vec<(ProfileId, JoinHandle<CycleReport>)> = {
            let mut cycles = self.cycles.lock();
            let done: Vec<ProfileId> = cycles
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(id, _)| *id)
                .collect();
            done.into_iter()
                .filter_map(|id| cycles.remove(&id).map(|handle| (id, handle)))
                .collect()
        };

        for (profile_id, handle) in finished {
            let result = handle.await;
            self.apply(profile_id, result);
        }

        self.start_due_cycles();
    }

    fn start_due_cycles(&self) {
        let profiles = match self.store.list_profiles() {
            Ok(profiles) => profiles,
            Err(e) => {
                error!("Failed to list profiles: {}", e);
                return;
            }
        };

        let now = Instant::now();
        let sessions = self.sessions.read();
        let mut states = self.profiles.lock();
        let mut cycles = self.cycles.lock();

        for profile in profiles {
            let Some(session) = sessions.get(&profile.id) else {
                continue;
            };
            if !profile.settings.broadcast_enabled || cycles.contains_key(&profile.id) {
                continue;
            }

            let state = states.entry(profile.id).or_insert_with(|| {
                ProfileRunState::new(profile.settings.messages_per_minute, self.jitter)
            });
            if !state.is_due(now) {
                continue;
            }

            let resume_at = state.take_resume_cursor(now);
            if let Some(cursor) = &resume_at {
                info!("Profile {}: backoff over, resuming at {}", profile.id, cursor);
            }
            state.interval = Duration::from_secs(profile.settings.send_interval_secs);

            let cycle = BroadcastCycle {
                profile_id: profile.id,
                store: Arc::clone(&self.store),
                resolver: Arc::clone(&self.resolver),
                session: Arc::clone(session),
                pacer: Arc::clone(&state.pacer),
                policy: self.policy,
            };
            let strikes = std::mem::take(&mut state.strikes);

            debug!("Profile {}: spawning cycle", profile.id);
            cycles.insert(profile.id, tokio::spawn(cycle.run(resume_at, strikes)));
        }
    }

    fn apply(&self, profile_id: ProfileId, result: Result<CycleReport, JoinError>) {
        let now = Instant::now();
        let mut profiles = self.profiles.lock();
        let Some(state) = profiles.get_mut(&profile_id) else {
            return;
        };

        match result {
            Ok(report) => {
                state.stats.total_sent += report.sent as u64;
                state.stats.total_removed += report.removed.len() as u64;
                state.strikes = report.strikes;
                state.finish_cycle(report.outcome, now);
            }
            Err(e) if e.is_cancelled() => {
                debug!("Profile {}: cycle cancelled", profile_id);
                state.next_cycle_at = Some(instant_after(now, state.interval));
            }
            Err(e) => {
                error!("Profile {}: cycle task panicked: {}", profile_id, e);
                state.finish_cycle(CycleOutcome::Failed(format!("cycle task panicked: {e}")), now);
            }
        }
    }

    /// Waits for running cycles up to the grace period, aborts the rest,
    /// then disconnects every session.
    pub async fn shutdown(&self) {
        let running: Vec<(ProfileId, JoinHandle<CycleReport>)> =
            self.cycles.lock().drain().collect();

        if !running.is_empty() {
            info!(
                "Waiting up to {:?} for {} running cycles",
                self.shutdown_grace,
                running.len()
            );
        }

        let deadline = instant_after(Instant::now(), self.shutdown_grace);
        for (profile_id, mut handle) in running {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(result) => self.apply(profile_id, result),
                Err(_) => {
                    warn!("Profile {}: aborting unfinished cycle", profile_id);
                    handle.abort();
                }
            }
        }

        let sessions: Vec<Arc<dyn MessagingSession>> =
            self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.disconnect();
        }
        info!("Scheduler stopped");
    }

    /// Waits for every running cycle and applies its outcome.
    #[cfg(test)]
    async fn drain(&self) {
        let running: Vec<(ProfileId, JoinHandle<CycleReport>)> =
            self.cycles.lock().drain().collect();
        for (profile_id, handle) in running {
            let result = handle.await;
            self.apply(profile_id, result);
        }
    }
}

impl std::fmt::Debug for BroadcastScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastScheduler")
            .field("tick_interval", &self.tick_interval)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SettingUpdate;
    use crate::telegram::SessionError;
    use crate::testing::{FakeSession, new_profile, test_store};

    const G1: &str = "https://t.me/group_one";
    const G2: &str = "https://t.me/group_two";

    fn scheduler(store: &Arc<SettingsStore>) -> BroadcastScheduler {
        BroadcastScheduler::new(
            Arc::clone(store),
            Arc::new(DestinationResolver::new(None)),
            &SchedulerConfig::default(),
        )
    }

    fn enable(store: &SettingsStore, profile: ProfileId, interval_secs: u64) {
        store
            .update_setting(profile, &SettingUpdate::BroadcastEnabled(true))
            .unwrap();
        store
            .update_setting(profile, &SettingUpdate::SendIntervalSecs(interval_secs))
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_profile_never_sends() {
        let (_dir, store, profile) = test_store();
        store.add_destination(profile, G1).unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let session = Arc::new(FakeSession::new(profile).with_destination(G1));
        scheduler.register_session(session.clone());

        for _ in 0..5 {
            scheduler.tick().await;
            scheduler.drain().await;
            tokio::time::advance(Duration::from_secs(60)).await;
        }

        assert!(session.attempts().is_empty());
        assert!(!scheduler.status(profile).in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_without_session_is_skipped() {
        let (_dir, store, profile) = test_store();
        enable(&store, profile, 60);
        store.add_destination(profile, G1).unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);

        scheduler.tick().await;

        let status = scheduler.status(profile);
        assert!(!status.connected);
        assert!(!status.in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_cycle_waits_for_interval() {
        let (_dir, store, profile) = test_store();
        enable(&store, profile, 60);
        store.add_destination(profile, G1).unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let session = Arc::new(FakeSession::new(profile).with_destination(G1));
        scheduler.register_session(session.clone());

        scheduler.tick().await;
        scheduler.drain().await;
        assert_eq!(session.delivered().len(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        scheduler.tick().await;
        scheduler.drain().await;
        assert_eq!(session.delivered().len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        scheduler.tick().await;
        scheduler.drain().await;
        assert_eq!(session.delivered().len(), 2);
        assert_eq!(scheduler.status(profile).stats.total_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backs_off_then_resumes() {
        let (_dir, store, profile) = test_store();
        enable(&store, profile, 600);
        store.add_destinations(profile, &[G1, G2]).unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let session = Arc::new(
            FakeSession::new(profile)
                .with_destination(G1)
                .with_destination(G2)
                .script_send(G2, vec![Err(SessionError::RateLimited(10))]),
        );
        scheduler.register_session(session.clone());
        let started = Instant::now();

        scheduler.tick().await;
        scheduler.drain().await;

        // G2 failed two seconds in; backoff is 10s plus the 2s margin.
        let status = scheduler.status(profile);
        assert!(status.backoff.is_some());
        assert_eq!(store.list_destinations(profile).unwrap().len(), 2);

        tokio::time::advance(started + Duration::from_secs(13) - Instant::now()).await;
        scheduler.tick().await;
        assert!(!scheduler.status(profile).in_flight);

        tokio::time::advance(Duration::from_secs(2)).await;
        scheduler.tick().await;
        scheduler.drain().await;

        assert_eq!(session.delivered(), vec![G1.to_owned(), G2.to_owned()]);
        assert_eq!(
            session.attempts(),
            vec![G1.to_owned(), G2.to_owned(), G2.to_owned()]
        );
        assert_eq!(
            scheduler.status(profile).stats.last_outcome,
            Some(CycleOutcome::Completed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_of_one_profile_does_not_block_another() {
        let (_dir, store, first) = test_store();
        let second = store.create_profile(&new_profile("+10000000002")).unwrap();
        enable(&store, first, 5);
        enable(&store, second, 5);
        store.add_destination(first, G1).unwrap();
        store.add_destination(second, G2).unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);

        let limited = Arc::new(
            FakeSession::new(first)
                .with_destination(G1)
                .script_send(G1, vec![Err(SessionError::RateLimited(100))]),
        );
        let healthy = Arc::new(FakeSession::new(second).with_destination(G2));
        scheduler.register_session(limited.clone());
        scheduler.register_session(healthy.clone());

        scheduler.tick().await;
        scheduler.drain().await;

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(6)).await;
            scheduler.tick().await;
            scheduler.drain().await;
        }

        assert!(limited.delivered().is_empty());
        assert_eq!(limited.attempts().len(), 1);
        assert_eq!(healthy.delivered().len(), 4);
        assert!(scheduler.status(first).backoff.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_skips_interval_but_not_backoff() {
        let (_dir, store, profile) = test_store();
        enable(&store, profile, 3600);
        store.add_destination(profile, G1).unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let session = Arc::new(FakeSession::new(profile).with_destination(G1));
        scheduler.register_session(session.clone());

        scheduler.tick().await;
        scheduler.drain().await;
        tokio::time::advance(Duration::from_secs(5)).await;

        scheduler.trigger(profile);
        scheduler.tick().await;
        scheduler.drain().await;

        assert_eq!(session.delivered().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_stored_interval_keeps_scheduler_alive() {
        let (dir, store, profile) = test_store();
        enable(&store, profile, 60);
        store.add_destination(profile, G1).unwrap();
        rusqlite::Connection::open(dir.path().join("test.db"))
            .unwrap()
            .execute(
                "UPDATE profiles SET send_interval_secs = ?1 WHERE id = ?2",
                rusqlite::params![i64::MAX, profile.0],
            )
            .unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let session = Arc::new(FakeSession::new(profile).with_destination(G1));
        scheduler.register_session(session.clone());

        scheduler.tick().await;
        scheduler.drain().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        scheduler.tick().await;
        scheduler.drain().await;

        assert_eq!(session.delivered().len(), 1);
        let status = scheduler.status(profile);
        assert_eq!(status.stats.last_outcome, Some(CycleOutcome::Completed));
        assert!(status.next_cycle_in.is_some_and(|wait| wait > Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_profile_disconnects_session() {
        let (_dir, store, profile) = test_store();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let session = Arc::new(FakeSession::new(profile));
        scheduler.register_session(session.clone());
        assert_eq!(scheduler.connected_profiles(), vec![profile]);

        scheduler.remove_profile(profile);

        assert!(session.is_disconnected());
        assert!(scheduler.session(profile).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disconnects_after_cycles() {
        let (_dir, store, profile) = test_store();
        enable(&store, profile, 60);
        store.add_destinations(profile, &[G1, G2]).unwrap();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let session = Arc::new(
            FakeSession::new(profile)
                .with_destination(G1)
                .with_destination(G2),
        );
        scheduler.register_session(session.clone());

        scheduler.tick().await;
        scheduler.shutdown().await;

        assert_eq!(session.delivered().len(), 2);
        assert!(session.is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_message() {
        let (_dir, store, _profile) = test_store();
        let store = Arc::new(store);
        let scheduler = scheduler(&store);
        let (tx, rx) = mpsc::channel(4);

        tx.send(SchedulerMessage::Shutdown).await.unwrap();
        scheduler.run(rx).await;
    }
}
