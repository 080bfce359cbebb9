//! Destination resolver and cache.
//!
//! Maps `(profile, reference)` pairs to resolved entity handles. Lookups hit
//! the session only on a cache miss or once an entry is older than the
//! configured max age. Entries must be invalidated whenever a destination is
//! removed, so a later re-add resolves afresh.

mod reference;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub use reference::{DestinationRef, ReferenceError, normalize_reference};

use crate::store::ProfileId;
use crate::telegram::{EntityHandle, MessagingSession, SessionError};

#[derive(Debug, Clone)]
struct CacheEntry {
    handle: EntityHandle,
    cached_at: Instant,
}

/// Memoising resolver shared by every profile task.
#[derive(Debug, Default)]
pub struct DestinationResolver {
    entries: Mutex<HashMap<(ProfileId, String), CacheEntry>>,
    max_age: Option<Duration>,
}

impl DestinationResolver {
    /// Creates a resolver. Entries older than `max_age` are re-resolved.
    #[must_use]
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Resolves `reference` for the session's profile.
    ///
    /// Failures are returned as-is and never cached.
    pub async fn resolve(
        &self,
        session: &dyn MessagingSession,
        reference: &str,
    ) -> Result<EntityHandle, SessionError> {
        let key = (session.profile_id(), reference.to_owned());

        if let Some(handle) = self.lookup(&key) {
            return Ok(handle);
        }

        let handle = session.resolve_entity(reference).await?;
        debug!(
            "Profile {}: resolved {} to {} ({})",
            key.0, reference, handle.id, handle.title
        );
        self.entries.lock().insert(
            key,
            CacheEntry {
                handle: handle.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(handle)
    }

    fn lookup(&self, key: &(ProfileId, String)) -> Option<EntityHandle> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;

        if self
            .max_age
            .is_some_and(|max_age| entry.cached_at.elapsed() >= max_age)
        {
            entries.remove(key);
            return None;
        }
        Some(entry.handle.clone())
    }

    /// Drops the cached handle of one destination.
    ///
    /// Returns `true` if an entry was present.
    pub fn invalidate(&self, profile: ProfileId, reference: &str) -> bool {
        self.entries
            .lock()
            .remove(&(profile, reference.to_owned()))
            .is_some()
    }

    /// Drops every cached handle of a profile.
    pub fn invalidate_profile(&self, profile: ProfileId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(owner, _), _| *owner != profile);
        before - entries.len()
    }

    /// References of the profile whose cached handle points at `entity_id`.
    #[must_use]
    pub fn cached_references(&self, profile: ProfileId, entity_id: i64) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|((owner, _), entry)| *owner == profile && entry.handle.id == entity_id)
            .map(|((_, reference), _)| reference.clone())
            .collect()
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
