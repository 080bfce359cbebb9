//! Settings store module.
//!
//! Persists profiles, their per-profile settings and the destinations
//! each profile broadcasts to.

mod sqlite;
mod types;

pub use sqlite::SettingsStore;
pub use types::{
    AddOutcome, AddSummary, MAX_SEND_INTERVAL_SECS, NewProfile, Profile, ProfileId, ProfileSettings, RemoveOutcome,
    SettingUpdate, StoreError,
};
