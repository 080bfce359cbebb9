//! SQLite-backed settings store.
//!
//! Profiles and destinations live in two tables of the same database file.
//! Each table is accessed through its own connection and lock, so a slow
//! destination write never stalls a profile read and vice versa.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use super::types::{
    AddOutcome, AddSummary, NewProfile, Profile, ProfileId, ProfileSettings, RemoveOutcome,
    SettingUpdate, StoreError,
};

const PROFILE_COLUMNS: &str = "id, api_id, api_hash, phone, session_path, created_at, \
     auto_reply_enabled, auto_reply_text, mention_reply_enabled, mention_reply_text, \
     broadcast_text, broadcast_enabled, messages_per_minute, send_interval_secs";

/// Persistent store for profiles, their settings and destination lists.
pub struct SettingsStore {
    /// Connection guarding the `profiles` table.
    profiles: Mutex<Connection>,

    /// Connection guarding the `destinations` table.
    destinations: Mutex<Connection>,

    /// Location of the database file.
    path: PathBuf,
}

impl SettingsStore {
    /// Opens (and if needed creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let profiles = open_connection(&path)?;
        initialize_schema(&profiles)?;
        let destinations = open_connection(&path)?;

        info!("Opened settings store at {}", path.display());

        Ok(Self {
            profiles: Mutex::new(profiles),
            destinations: Mutex::new(destinations),
            path,
        })
    }

    /// Returns the database file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a new profile with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn create_profile(&self, profile: &NewProfile) -> Result<ProfileId, StoreError> {
        let defaults = ProfileSettings::default();
        let conn = self.profiles.lock();
        conn.execute(
            "INSERT INTO profiles (api_id, api_hash, phone, session_path, created_at, \
             auto_reply_enabled, auto_reply_text, mention_reply_enabled, mention_reply_text, \
             broadcast_text, broadcast_enabled, messages_per_minute, send_interval_secs) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                profile.api_id,
                profile.api_hash,
                profile.phone,
                profile.session_path.to_string_lossy().into_owned(),
                Utc::now().timestamp(),
                defaults.auto_reply_enabled,
                defaults.auto_reply_text,
                defaults.mention_reply_enabled,
                defaults.mention_reply_text,
                defaults.broadcast_text,
                defaults.broadcast_enabled,
                i64::from(defaults.messages_per_minute),
                seconds_to_sql(defaults.send_interval_secs),
            ],
        )?;
        let id = ProfileId(conn.last_insert_rowid());
        debug!("Created profile {} for {}", id, profile.phone);
        Ok(id)
    }

    /// Deletes a profile together with all of its destinations.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_profile(&self, id: ProfileId) -> Result<RemoveOutcome, StoreError> {
        let conn = self.profiles.lock();
        let removed = conn.execute("DELETE FROM profiles WHERE id = ?1", params![id.0])?;
        Ok(if removed == 0 {
            RemoveOutcome::NotFound
        } else {
            debug!("Deleted profile {} and its destinations", id);
            RemoveOutcome::Removed
        })
    }

    /// Lists every stored profile ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let conn = self.profiles.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY id"
        ))?;
        let profiles = stmt
            .query_map([], profile_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    /// Looks up a single profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_profile(&self, id: ProfileId) -> Result<Option<Profile>, StoreError> {
        let conn = self.profiles.lock();
        let profile = conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![id.0],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    /// Returns the settings of a profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the profile does not exist.
    pub fn get_settings(&self, id: ProfileId) -> Result<ProfileSettings, StoreError> {
        self.get_profile(id)?
            .map(|profile| profile.settings)
            .ok_or(StoreError::NotFound(id))
    }

    /// Updates a single setting of a profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidValue`] for values breaking an invariant
    /// and [`StoreError::NotFound`] if the profile does not exist.
    pub fn update_setting(&self, id: ProfileId, update: &SettingUpdate) -> Result<(), StoreError> {
        update.validate()?;

        let sql = format!("UPDATE profiles SET {} = ?1 WHERE id = ?2", update.column());
        let conn = self.profiles.lock();
        let changed = match update {
            SettingUpdate::AutoReplyEnabled(value)
            | SettingUpdate::MentionReplyEnabled(value)
            | SettingUpdate::BroadcastEnabled(value) => conn.execute(&sql, params![value, id.0])?,
            SettingUpdate::AutoReplyText(text)
            | SettingUpdate::MentionReplyText(text)
            | SettingUpdate::BroadcastText(text) => conn.execute(&sql, params![text.trim(), id.0])?,
            SettingUpdate::MessagesPerMinute(rate) => {
                conn.execute(&sql, params![i64::from(*rate), id.0])?
            }
            SettingUpdate::SendIntervalSecs(secs) => {
                conn.execute(&sql, params![seconds_to_sql(*secs), id.0])?
            }
        };

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        debug!("Profile {}: updated {}", id, update.column());
        Ok(())
    }

    /// Lists the destinations of a profile in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_destinations(&self, id: ProfileId) -> Result<Vec<String>, StoreError> {
        let conn = self.destinations.lock();
        let mut stmt = conn.prepare(
            "SELECT reference FROM destinations WHERE profile_id = ?1 ORDER BY position",
        )?;
        let references = stmt
            .query_map(params![id.0], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(references)
    }

    /// Adds a destination. Duplicates are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the profile does not exist.
    pub fn add_destination(&self, id: ProfileId, reference: &str) -> Result<AddOutcome, StoreError> {
        let conn = self.destinations.lock();
        insert_destination(&conn, id, reference)
    }

    /// Adds several destinations at once, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the profile does not exist.
    pub fn add_destinations<S: AsRef<str>>(
        &self,
        id: ProfileId,
        references: &[S],
    ) -> Result<AddSummary, StoreError> {
        let conn = self.destinations.lock();
        let mut summary = AddSummary::default();
        for reference in references {
            match insert_destination(&conn, id, reference.as_ref())? {
                AddOutcome::Added => summary.added += 1,
                AddOutcome::AlreadyExists => summary.already_present += 1,
            }
        }
        Ok(summary)
    }

    /// Removes a destination from a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_destination(
        &self,
        id: ProfileId,
        reference: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        let conn = self.destinations.lock();
        let removed = conn.execute(
            "DELETE FROM destinations WHERE profile_id = ?1 AND reference = ?2",
            params![id.0, reference],
        )?;
        Ok(if removed == 0 {
            RemoveOutcome::NotFound
        } else {
            RemoveOutcome::Removed
        })
    }

    /// Whether `reference` is currently a destination of the profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn has_destination(&self, id: ProfileId, reference: &str) -> Result<bool, StoreError> {
        let conn = self.destinations.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM destinations WHERE profile_id = ?1 AND reference = ?2",
                params![id.0, reference],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Counts the destinations of a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_destinations(&self, id: ProfileId) -> Result<usize, StoreError> {
        let conn = self.destinations.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM destinations WHERE profile_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn insert_destination(
    conn: &Connection,
    id: ProfileId,
    reference: &str,
) -> Result<AddOutcome, StoreError> {
    let exists = conn
        .query_row("SELECT 1 FROM profiles WHERE id = ?1", params![id.0], |_| Ok(()))
        .optional()?
        .is_some();
    if !exists {
        return Err(StoreError::NotFound(id));
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO destinations (profile_id, reference) VALUES (?1, ?2)",
        params![id.0, reference],
    )?;
    Ok(if inserted == 0 {
        AddOutcome::AlreadyExists
    } else {
        AddOutcome::Added
    })
}

/// Opens a connection with WAL journaling, foreign keys and a busy timeout.
fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(conn)
}

fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            api_id INTEGER NOT NULL,
            api_hash TEXT NOT NULL,
            phone TEXT NOT NULL,
            session_path TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            auto_reply_enabled INTEGER NOT NULL,
            auto_reply_text TEXT NOT NULL,
            mention_reply_enabled INTEGER NOT NULL,
            mention_reply_text TEXT NOT NULL,
            broadcast_text TEXT NOT NULL,
            broadcast_enabled INTEGER NOT NULL,
            messages_per_minute INTEGER NOT NULL CHECK (messages_per_minute > 0),
            send_interval_secs INTEGER NOT NULL CHECK (send_interval_secs > 0)
        );
        CREATE TABLE IF NOT EXISTS destinations (
            position INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
            reference TEXT NOT NULL,
            UNIQUE (profile_id, reference)
        );
        CREATE INDEX IF NOT EXISTS idx_destinations_profile
            ON destinations(profile_id, position);
        ",
    )?;
    Ok(())
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let created_at: i64 = row.get(5)?;
    let messages_per_minute: i64 = row.get(12)?;
    let send_interval_secs: i64 = row.get(13)?;
    let session_path: String = row.get(4)?;

    Ok(Profile {
        id: ProfileId(row.get(0)?),
        api_id: row.get(1)?,
        api_hash: row.get(2)?,
        phone: row.get(3)?,
        session_path: PathBuf::from(session_path),
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        settings: ProfileSettings {
            auto_reply_enabled: row.get(6)?,
            auto_reply_text: row.get(7)?,
            mention_reply_enabled: row.get(8)?,
            mention_reply_text: row.get(9)?,
            broadcast_text: row.get(10)?,
            broadcast_enabled: row.get(11)?,
            messages_per_minute: u32::try_from(messages_per_minute).unwrap_or(1),
            send_interval_secs: u64::try_from(send_interval_secs).unwrap_or(1),
        },
    })
}

/// Converts seconds to an SQLite integer. Values are validated beforehand.
fn seconds_to_sql(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn open_store() -> (TempDir, SettingsStore) {
        let dir = tempdir().expect("tempdir");
        let store = SettingsStore::open(dir.path().join("broadcaster.db")).expect("open store");
        (dir, store)
    }

    fn new_profile(phone: &str) -> NewProfile {
        NewProfile {
            api_id: 12345,
            api_hash: "hash".to_owned(),
            phone: phone.to_owned(),
            session_path: PathBuf::from(format!("sessions/{phone}.session")),
        }
    }

    #[test]
    fn test_create_and_list_profiles() {
        let (_dir, store) = open_store();
        let first = store.create_profile(&new_profile("+10000000001")).unwrap();
        let second = store.create_profile(&new_profile("+10000000002")).unwrap();

        let profiles = store.list_profiles().unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].id, first);
        assert_eq!(profiles[1].id, second);
        assert_eq!(profiles[0].settings, ProfileSettings::default());
        assert_eq!(profiles[1].phone, "+10000000002");
    }

    #[test]
    fn test_update_setting_persists() {
        let (dir, store) = open_store();
        let id = store.create_profile(&new_profile("+10000000001")).unwrap();

        store
            .update_setting(id, &SettingUpdate::BroadcastEnabled(true))
            .unwrap();
        store
            .update_setting(id, &SettingUpdate::MessagesPerMinute(12))
            .unwrap();
        store
            .update_setting(id, &SettingUpdate::BroadcastText("  Hello groups  ".to_owned()))
            .unwrap();
        drop(store);

        let reopened = SettingsStore::open(dir.path().join("broadcaster.db")).unwrap();
        let settings = reopened.get_settings(id).unwrap();
        assert!(settings.broadcast_enabled);
        assert_eq!(settings.messages_per_minute, 12);
        assert_eq!(settings.broadcast_text, "Hello groups");
    }

    #[test]
    fn test_update_setting_rejects_invalid_and_unknown() {
        let (_dir, store) = open_store();
        let id = store.create_profile(&new_profile("+10000000001")).unwrap();

        assert!(matches!(
            store.update_setting(id, &SettingUpdate::SendIntervalSecs(0)),
            Err(StoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            store.update_setting(ProfileId(999), &SettingUpdate::BroadcastEnabled(true)),
            Err(StoreError::NotFound(ProfileId(999)))
        ));
        assert!(matches!(
            store.get_settings(ProfileId(999)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_add_destination_is_idempotent() {
        let (_dir, store) = open_store();
        let id = store.create_profile(&new_profile("+10000000001")).unwrap();

        assert_eq!(
            store.add_destination(id, "https://t.me/rustlang").unwrap(),
            AddOutcome::Added
        );
        assert_eq!(
            store.add_destination(id, "https://t.me/rustlang").unwrap(),
            AddOutcome::AlreadyExists
        );
        assert_eq!(store.list_destinations(id).unwrap(), vec!["https://t.me/rustlang"]);
    }

    #[test]
    fn test_destinations_keep_insertion_order() {
        let (_dir, store) = open_store();
        let id = store.create_profile(&new_profile("+10000000001")).unwrap();

        let summary = store
            .add_destinations(id, &["https://t.me/c", "https://t.me/a", "https://t.me/b", "https://t.me/a"])
            .unwrap();
        assert_eq!(summary.added, 3);
        assert_eq!(summary.already_present, 1);

        store.remove_destination(id, "https://t.me/a").unwrap();
        store.add_destination(id, "https://t.me/a").unwrap();

        assert_eq!(
            store.list_destinations(id).unwrap(),
            vec!["https://t.me/c", "https://t.me/b", "https://t.me/a"]
        );
    }

    #[test]
    fn test_remove_destination_outcomes() {
        let (_dir, store) = open_store();
        let id = store.create_profile(&new_profile("+10000000001")).unwrap();
        store.add_destination(id, "https://t.me/a").unwrap();

        assert_eq!(
            store.remove_destination(id, "https://t.me/a").unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(
            store.remove_destination(id, "https://t.me/a").unwrap(),
            RemoveOutcome::NotFound
        );
        assert!(store.list_destinations(id).unwrap().is_empty());
    }

    #[test]
    fn test_has_destination_tracks_removal() {
        let (_dir, store) = open_store();
        let first = store.create_profile(&new_profile("+10000000001")).unwrap();
        let second = store.create_profile(&new_profile("+10000000002")).unwrap();
        store.add_destination(first, "https://t.me/a").unwrap();

        assert!(store.has_destination(first, "https://t.me/a").unwrap());
        assert!(!store.has_destination(second, "https://t.me/a").unwrap());

        store.remove_destination(first, "https://t.me/a").unwrap();
        assert!(!store.has_destination(first, "https://t.me/a").unwrap());
    }

    #[test]
    fn test_destination_for_unknown_profile_is_rejected() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.add_destination(ProfileId(42), "https://t.me/a"),
            Err(StoreError::NotFound(ProfileId(42)))
        ));
    }

    #[test]
    fn test_delete_profile_cascades_destinations() {
        let (_dir, store) = open_store();
        let keep = store.create_profile(&new_profile("+10000000001")).unwrap();
        let gone = store.create_profile(&new_profile("+10000000002")).unwrap();
        store.add_destination(keep, "https://t.me/a").unwrap();
        store.add_destination(gone, "https://t.me/a").unwrap();
        store.add_destination(gone, "https://t.me/b").unwrap();

        assert_eq!(store.delete_profile(gone).unwrap(), RemoveOutcome::Removed);
        assert_eq!(store.delete_profile(gone).unwrap(), RemoveOutcome::NotFound);

        assert!(store.list_destinations(gone).unwrap().is_empty());
        assert_eq!(store.count_destinations(keep).unwrap(), 1);
        assert_eq!(store.list_profiles().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_access_from_threads() {
        let (_dir, store) = open_store();
        let store = std::sync::Arc::new(store);
        let id = store.create_profile(&new_profile("+10000000001")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .add_destination(id, &format!("https://t.me/g{worker}_{i}"))
                            .unwrap();
                        store.get_settings(id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count_destinations(id).unwrap(), 40);
    }
}
