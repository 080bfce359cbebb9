//! Scripted in-memory session and store helpers for tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::store::{NewProfile, ProfileId, SettingsStore};
use crate::telegram::{
    EntityHandle, EntityKind, IncomingMessage, MessageId, MessagingSession, SessionError,
};

/// Opens a store in a temporary directory with one profile.
pub fn test_store() -> (tempfile::TempDir, SettingsStore, ProfileId) {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::open(dir.path().join("test.db")).unwrap();
    let profile = store.create_profile(&new_profile("+10000000001")).unwrap();
    (dir, store, profile)
}

pub fn new_profile(phone: &str) -> NewProfile {
    NewProfile {
        api_id: 12345,
        api_hash: "hash".to_owned(),
        phone: phone.to_owned(),
        session_path: PathBuf::from(format!("sessions/{phone}.session")),
    }
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: i64,
    entities: HashMap<String, EntityHandle>,
    references: HashMap<i64, String>,
    resolve_failures: HashMap<String, SessionError>,
    join_failures: HashMap<String, SessionError>,
    send_scripts: HashMap<String, VecDeque<Result<(), SessionError>>>,
    linked: HashMap<String, String>,
    memberships: Vec<String>,
    restricted: Vec<String>,
    username: Option<String>,

    resolve_calls: Vec<String>,
    attempts: Vec<String>,
    delivered: Vec<String>,
    joined: Vec<String>,
    left: Vec<String>,
    replies: Vec<(i64, String)>,
    disconnected: bool,
}

/// A `MessagingSession` whose provider behaviour is scripted per reference.
///
/// Sends succeed unless a result was queued with [`FakeSession::script_send`].
#[derive(Debug)]
pub struct FakeSession {
    profile_id: ProfileId,
    state: Mutex<FakeState>,
    incoming_tx: Mutex<Option<mpsc::UnboundedSender<IncomingMessage>>>,
    incoming_rx: AsyncMutex<mpsc::UnboundedReceiver<IncomingMessage>>,
}

impl FakeSession {
    pub fn new(profile_id: ProfileId) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            profile_id,
            state: Mutex::new(FakeState::default()),
            incoming_tx: Mutex::new(Some(incoming_tx)),
            incoming_rx: AsyncMutex::new(incoming_rx),
        }
    }

    /// Makes `reference` resolvable to a supergroup.
    pub fn with_destination(self, reference: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = 1000 + state.next_id;
            state.entities.insert(
                reference.to_owned(),
                EntityHandle {
                    id,
                    access_hash: id * 7,
                    kind: EntityKind::Megagroup,
                    title: reference.rsplit('/').next().unwrap_or(reference).to_owned(),
                    username: None,
                },
            );
            state.references.insert(id, reference.to_owned());
        }
        self
    }

    pub fn with_linked(self, reference: &str, linked: &str) -> Self {
        self.state
            .lock()
            .linked
            .insert(reference.to_owned(), linked.to_owned());
        self
    }

    /// Queues send results for `reference`, consumed one per attempt.
    pub fn script_send(self, reference: &str, results: Vec<Result<(), SessionError>>) -> Self {
        self.state
            .lock()
            .send_scripts
            .entry(reference.to_owned())
            .or_default()
            .extend(results);
        self
    }

    pub fn fail_resolve(self, reference: &str, error: SessionError) -> Self {
        self.state
            .lock()
            .resolve_failures
            .insert(reference.to_owned(), error);
        self
    }

    pub fn fail_join(self, reference: &str, error: SessionError) -> Self {
        self.state
            .lock()
            .join_failures
            .insert(reference.to_owned(), error);
        self
    }

    pub fn with_memberships(self, references: &[&str]) -> Self {
        self.state.lock().memberships = references.iter().map(|r| (*r).to_owned()).collect();
        self
    }

    /// Marks destinations added with `with_destination` as banned or muted.
    pub fn with_restricted(self, references: &[&str]) -> Self {
        self.state.lock().restricted = references.iter().map(|r| (*r).to_owned()).collect();
        self
    }

    pub fn with_username(self, username: &str) -> Self {
        self.state.lock().username = Some(username.to_owned());
        self
    }

    pub fn forget_destination(&self, reference: &str) {
        self.state.lock().entities.remove(reference);
    }

    pub fn push_incoming(&self, message: IncomingMessage) {
        if let Some(tx) = self.incoming_tx.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    /// Ends the incoming subscription once queued messages are drained.
    pub fn close_incoming(&self) {
        self.incoming_tx.lock().take();
    }

    pub fn resolve_calls(&self) -> Vec<String> {
        self.state.lock().resolve_calls.clone()
    }

    /// Every send attempt, including failed ones.
    pub fn attempts(&self) -> Vec<String> {
        self.state.lock().attempts.clone()
    }

    /// Successful sends only.
    pub fn delivered(&self) -> Vec<String> {
        self.state.lock().delivered.clone()
    }

    pub fn joined(&self) -> Vec<String> {
        self.state.lock().joined.clone()
    }

    pub fn left(&self) -> Vec<String> {
        self.state.lock().left.clone()
    }

    pub fn replies(&self) -> Vec<(i64, String)> {
        self.state.lock().replies.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.lock().disconnected
    }

    fn reference_of(state: &FakeState, entity: &EntityHandle) -> String {
        state
            .references
            .get(&entity.id)
            .cloned()
            .unwrap_or_else(|| entity.reference())
    }
}

#[async_trait]
impl MessagingSession for FakeSession {
    fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    async fn is_authorized(&self) -> Result<bool, SessionError> {
        Ok(!self.state.lock().disconnected)
    }

    async fn resolve_entity(&self, reference: &str) -> Result<EntityHandle, SessionError> {
        let mut state = self.state.lock();
        state.resolve_calls.push(reference.to_owned());

        if let Some(error) = state.resolve_failures.get(reference) {
            return Err(error.clone());
        }
        state
            .entities
            .get(reference)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(reference.to_owned()))
    }

    async fn send_message(
        &self,
        entity: &EntityHandle,
        _text: &str,
    ) -> Result<MessageId, SessionError> {
        let mut state = self.state.lock();
        let reference = Self::reference_of(&state, entity);
        state.attempts.push(reference.clone());

        let scripted = state
            .send_scripts
            .get_mut(&reference)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()));

        scripted.map(|()| {
            state.delivered.push(reference);
            MessageId::try_from(state.delivered.len()).unwrap_or(MessageId::MAX)
        })
    }

    async fn join_destination(&self, entity: &EntityHandle) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let reference = Self::reference_of(&state, entity);
        if let Some(error) = state.join_failures.get(&reference) {
            return Err(error.clone());
        }
        state.joined.push(reference);
        Ok(())
    }

    async fn leave_destination(&self, entity: &EntityHandle) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let reference = Self::reference_of(&state, entity);
        state.left.push(reference);
        Ok(())
    }

    async fn linked_discussion_channel(
        &self,
        entity: &EntityHandle,
    ) -> Result<Option<EntityHandle>, SessionError> {
        let state = self.state.lock();
        let reference = Self::reference_of(&state, entity);
        Ok(state
            .linked
            .get(&reference)
            .and_then(|linked| state.entities.get(linked))
            .cloned())
    }

    async fn list_current_memberships(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.state.lock().memberships.clone())
    }

    async fn list_restricted_memberships(&self) -> Result<Vec<EntityHandle>, SessionError> {
        let state = self.state.lock();
        Ok(state
            .restricted
            .iter()
            .filter_map(|reference| state.entities.get(reference))
            .cloned()
            .collect())
    }

    async fn own_username(&self) -> Result<Option<String>, SessionError> {
        Ok(self.state.lock().username.clone())
    }

    async fn send_reply(
        &self,
        incoming: &IncomingMessage,
        text: &str,
    ) -> Result<MessageId, SessionError> {
        let mut state = self.state.lock();
        state.replies.push((incoming.chat_id, text.to_owned()));
        Ok(incoming.id + 1)
    }

    async fn next_incoming(&self) -> Option<IncomingMessage> {
        self.incoming_rx.lock().await.recv().await
    }

    fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }
}
