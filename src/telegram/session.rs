//! Messaging session contract consumed by the scheduler and responders.

use async_trait::async_trait;

use super::SessionError;
use crate::store::ProfileId;

/// Provider-side message identifier.
pub type MessageId = i32;

/// Kind of a resolved destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Broadcast channel.
    Channel,
    /// Supergroup.
    Megagroup,
    /// Legacy small group.
    BasicGroup,
    /// A user or bot.
    User,
}

/// A sendable entity resolved from a destination reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub id: i64,
    pub access_hash: i64,
    pub kind: EntityKind,
    pub title: String,
    pub username: Option<String>,
}

impl EntityHandle {
    /// Canonical reference string pointing at this entity.
    #[must_use]
    pub fn reference(&self) -> String {
        match &self.username {
            Some(username) => format!("https://t.me/{}", username.to_ascii_lowercase()),
            None => format!("https://t.me/c/{}", self.id),
        }
    }

    /// Whether the entity is a channel or supergroup.
    #[must_use]
    pub const fn is_channel_like(&self) -> bool {
        matches!(self.kind, EntityKind::Channel | EntityKind::Megagroup)
    }
}

/// Where an incoming message was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

/// An incoming message delivered by the session subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Provider id of the message.
    pub id: MessageId,

    pub chat_kind: ChatKind,

    /// Provider id of the chat (user id for private chats).
    pub chat_id: i64,

    /// Whether the message was sent by this account.
    pub outgoing: bool,

    pub text: String,
}

/// One authenticated connection of a profile to the messaging provider.
///
/// The scheduler only talks to the provider through this trait, which keeps
/// the broadcast logic independent of the transport.
#[async_trait]
pub trait MessagingSession: Send + Sync {
    /// Profile this session belongs to.
    fn profile_id(&self) -> ProfileId;

    /// Checks whether the session is logged in.
    async fn is_authorized(&self) -> Result<bool, SessionError>;

    /// Resolves a canonical destination reference to a sendable entity.
    async fn resolve_entity(&self, reference: &str) -> Result<EntityHandle, SessionError>;

    /// Sends a text message.
    async fn send_message(&self, entity: &EntityHandle, text: &str)
    -> Result<MessageId, SessionError>;

    /// Joins a channel or group.
    async fn join_destination(&self, entity: &EntityHandle) -> Result<(), SessionError>;

    /// Leaves a channel or group.
    async fn leave_destination(&self, entity: &EntityHandle) -> Result<(), SessionError>;

    /// Returns the discussion chat linked to a channel or group, if any.
    async fn linked_discussion_channel(
        &self,
        entity: &EntityHandle,
    ) -> Result<Option<EntityHandle>, SessionError>;

    /// Lists canonical references of every channel and supergroup the account is in.
    async fn list_current_memberships(&self) -> Result<Vec<String>, SessionError>;

    /// Lists channels and supergroups the account was banned from or can no
    /// longer post in.
    async fn list_restricted_memberships(&self) -> Result<Vec<EntityHandle>, SessionError>;

    /// Username of the logged-in account, without the `@`.
    async fn own_username(&self) -> Result<Option<String>, SessionError>;

    /// Sends `text` into the chat an incoming message came from.
    async fn send_reply(
        &self,
        incoming: &IncomingMessage,
        text: &str,
    ) -> Result<MessageId, SessionError>;

    /// Waits for the next incoming message. `None` once the session is closed.
    async fn next_incoming(&self) -> Option<IncomingMessage>;

    /// Closes the connection.
    fn disconnect(&self);
}
