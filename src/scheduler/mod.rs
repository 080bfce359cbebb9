//! Broadcast scheduler module.
//!
//! Runs one broadcast cycle per profile at a time, paces sends per profile
//! and backs off when the provider rate-limits an account.

mod cycle;
mod pacer;
mod runner;
mod state;

pub use cycle::{BroadcastCycle, CyclePolicy, CycleReport};
pub use pacer::SendPacer;
pub use runner::{BroadcastScheduler, SchedulerMessage};
pub use state::{
    BackoffState, BackoffStatus, CycleOutcome, ProfileRunState, ProfileStats, ProfileStatus,
    instant_after,
};
