//! Importing an account's current memberships as destinations.

use thiserror::Error;
use tracing::{info, warn};

use crate::resolver::normalize_reference;
use crate::store::{AddSummary, ProfileId, SettingsStore, StoreError};
use crate::telegram::{MessagingSession, SessionError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to list memberships: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Adds every channel and megagroup the account belongs to as a
/// destination of `profile_id`.
///
/// # Errors
///
/// Returns an error if the membership list cannot be fetched or stored.
pub async fn seed_memberships(
    store: &SettingsStore,
    profile_id: ProfileId,
    session: &dyn MessagingSession,
) -> Result<AddSummary, SeedError> {
    let memberships = session.list_current_memberships().await?;

    let references: Vec<String> = memberships
        .iter()
        .filter_map(|reference| match normalize_reference(reference) {
            Ok(canonical) => Some(canonical),
            Err(e) => {
                warn!("Profile {}: skipping membership {}: {}", profile_id, reference, e);
                None
            }
        })
        .collect();

    let summary = store.add_destinations(profile_id, &references)?;
    info!(
        "Profile {}: seeded {} destinations ({} already present)",
        profile_id, summary.added, summary.already_present
    );
    Ok(summary)
}
