//! Telegram-backed messaging session for one profile.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::{Client, SenderPool, SignInError, sender};
use grammers_session::storages::SqliteSession;
use grammers_session::updates::UpdatesLike;
use grammers_tl_types as tl;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    ChatKind, EntityHandle, EntityKind, IncomingMessage, MessageId, MessagingSession,
    SessionError,
};
use crate::resolver::DestinationRef;
use crate::store::ProfileId;

/// Dialogs fetched per page when listing memberships.
const DIALOG_PAGE_SIZE: i32 = 100;

/// Upper bound on dialog pages walked in one listing.
const MAX_DIALOG_PAGES: usize = 50;

/// Errors that can occur while connecting or logging in.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(PasswordToken),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),
}

/// Entities and users seen so far, keyed by provider id.
#[derive(Debug, Default)]
struct PeerBook {
    chats: HashMap<i64, EntityHandle>,
    user_hashes: HashMap<i64, i64>,
}

impl PeerBook {
    fn remember_chats(&mut self, chats: &[tl::enums::Chat]) {
        for chat in chats {
            if let Some(handle) = handle_from_chat(chat) {
                self.chats.insert(handle.id, handle);
            }
        }
    }

    fn remember_users(&mut self, users: &[tl::enums::User]) {
        for user in users {
            if let tl::enums::User::User(user) = user
                && let Some(access_hash) = user.access_hash
            {
                self.user_hashes.insert(user.id, access_hash);
            }
        }
    }

    /// Turns a new-message update into an incoming message.
    ///
    /// Posts in broadcast channels are skipped.
    fn incoming_from_update(&self, update: tl::enums::Update) -> Option<IncomingMessage> {
        let message = match update {
            tl::enums::Update::NewMessage(update) => update.message,
            tl::enums::Update::NewChannelMessage(update) => update.message,
            _ => return None,
        };
        let tl::enums::Message::Message(message) = message else {
            return None;
        };

        let (chat_kind, chat_id) = self.chat_of(&message.peer_id)?;

        Some(IncomingMessage {
            id: message.id,
            chat_kind,
            chat_id,
            outgoing: message.out,
            text: message.message,
        })
    }

    /// Where a message in `peer` came from, or `None` for broadcast channels.
    fn chat_of(&self, peer: &tl::enums::Peer) -> Option<(ChatKind, i64)> {
        match peer {
            tl::enums::Peer::User(peer) => Some((ChatKind::Private, peer.user_id)),
            tl::enums::Peer::Chat(peer) => Some((ChatKind::Group, peer.chat_id)),
            tl::enums::Peer::Channel(peer) => {
                let broadcast = self
                    .chats
                    .get(&peer.channel_id)
                    .is_some_and(|handle| handle.kind == EntityKind::Channel);
                (!broadcast).then_some((ChatKind::Group, peer.channel_id))
            }
        }
    }
}

/// One logged-in Telegram account.
pub struct TelegramSession {
    profile_id: ProfileId,

    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Raw update batches pushed by the server.
    updates: AsyncMutex<mpsc::UnboundedReceiver<UpdatesLike>>,

    /// Incoming messages parsed from an update batch but not handed out yet.
    pending: Mutex<Vec<IncomingMessage>>,

    peers: Mutex<PeerBook>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramSession {
    /// Opens the session file and connects to Telegram.
    ///
    /// # Errors
    ///
    /// Returns an error if the session file cannot be opened or the
    /// connection fails.
    pub async fn connect(
        profile_id: ProfileId,
        api_id: i32,
        session_path: &Path,
    ) -> Result<Self, TelegramError> {
        info!("Profile {}: connecting to Telegram...", profile_id);

        let session = Arc::new(
            SqliteSession::open(session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!(
            "Profile {}: connected. Authorized: {}",
            profile_id, is_authorized
        );

        let session = Self {
            profile_id,
            client,
            handle: handle.thin,
            updates: AsyncMutex::new(updates),
            pending: Mutex::new(Vec::new()),
            peers: Mutex::new(PeerBook::default()),
            _pool_task: pool_task,
        };

        if is_authorized {
            // The server only pushes updates once the state has been fetched.
            if let Err(e) = session
                .client
                .invoke(&tl::functions::updates::GetState {})
                .await
            {
                warn!("Profile {}: could not fetch update state: {}", profile_id, e);
            }
        }

        Ok(session)
    }

    /// Requests a login code to be sent to the phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    ///
    /// # Errors
    ///
    /// Returns an error if sign in fails.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code).await {
            Ok(_user) => {
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(TelegramError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is invalid.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    async fn resolve_username(&self, username: &str) -> Result<EntityHandle, SessionError> {
        let request = tl::functions::contacts::ResolveUsername {
            username: username.to_owned(),
            referer: None,
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) =
            self.client.invoke(&request).await?;

        self.peers.lock().remember_chats(&resolved.chats);

        let wanted = match &resolved.peer {
            tl::enums::Peer::Channel(peer) => peer.channel_id,
            tl::enums::Peer::Chat(peer) => peer.chat_id,
            tl::enums::Peer::User(_) => {
                return Err(SessionError::NotFound(format!("@{username} is not a group")));
            }
        };
        find_chat(&resolved.chats, wanted)
    }

    async fn resolve_invite(&self, hash: &str) -> Result<EntityHandle, SessionError> {
        let request = tl::functions::messages::CheckChatInvite {
            hash: hash.to_owned(),
        };

        let chat = match self.client.invoke(&request).await? {
            tl::enums::ChatInvite::Already(already) => already.chat,
            tl::enums::ChatInvite::Peek(peek) => peek.chat,
            tl::enums::ChatInvite::Invite(_) => {
                info!("Profile {}: importing invite {}", self.profile_id, hash);
                let request = tl::functions::messages::ImportChatInvite {
                    hash: hash.to_owned(),
                };
                let chats = match self.client.invoke(&request).await? {
                    tl::enums::messages::ChatInviteJoinResult::Ok(joined) => {
                        updates_chats(&joined.updates)
                    }
                    tl::enums::messages::ChatInviteJoinResult::WebView(_) => Vec::new(),
                };
                self.peers.lock().remember_chats(&chats);
                return chats
                    .iter()
                    .find_map(handle_from_chat)
                    .ok_or_else(|| SessionError::NotFound(format!("invite {hash}")));
            }
        };

        self.peers
            .lock()
            .remember_chats(std::slice::from_ref(&chat));
        match chat {
            tl::enums::Chat::ChannelForbidden(_) | tl::enums::Chat::Forbidden(_) => {
                Err(SessionError::EntityPrivate)
            }
            other => {
                handle_from_chat(&other).ok_or_else(|| SessionError::NotFound(format!("invite {hash}")))
            }
        }
    }

    async fn resolve_channel_id(&self, id: i64) -> Result<EntityHandle, SessionError> {
        let known = self.peers.lock().chats.get(&id).cloned();
        if let Some(handle) = known {
            return Ok(handle);
        }

        // Private chats without a username are only reachable through dialogs.
        self.walk_dialogs().await?;
        self.peers
            .lock()
            .chats
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("channel {id}")))
    }

    /// Walks every dialog page, remembering chats and users along the way.
    ///
    /// Returns the channel and supergroup dialogs, including forbidden ones.
    async fn walk_dialogs(&self) -> Result<Vec<tl::enums::Chat>, SessionError> {
        let mut channels = Vec::new();
        let mut offset_date = 0;
        let mut offset_id = 0;
        let mut offset_peer = tl::enums::InputPeer::Empty;

        for _ in 0..MAX_DIALOG_PAGES {
            let request = tl::functions::messages::GetDialogs {
                exclude_pinned: false,
                folder_id: None,
                offset_date,
                offset_id,
                offset_peer: offset_peer.clone(),
                limit: DIALOG_PAGE_SIZE,
                hash: 0,
            };

            let (dialogs, messages, chats, users, complete) =
                match self.client.invoke(&request).await? {
                    tl::enums::messages::Dialogs::Dialogs(d) => {
                        (d.dialogs, d.messages, d.chats, d.users, true)
                    }
                    tl::enums::messages::Dialogs::Slice(d) => {
                        (d.dialogs, d.messages, d.chats, d.users, false)
                    }
                    tl::enums::messages::Dialogs::NotModified(_) => break,
                };

            {
                let mut peers = self.peers.lock();
                peers.remember_chats(&chats);
                peers.remember_users(&users);
            }

            channels.extend(chats.into_iter().filter(|chat| {
                matches!(
                    chat,
                    tl::enums::Chat::Channel(_) | tl::enums::Chat::ChannelForbidden(_)
                )
            }));

            let page_len = dialogs.len();
            let Some(last) = dialogs.iter().rev().find_map(|dialog| match dialog {
                tl::enums::Dialog::Dialog(dialog) => Some(dialog),
                tl::enums::Dialog::Folder(_) => None,
            }) else {
                break;
            };

            let Some(date) = messages.iter().find_map(|message| match message {
                tl::enums::Message::Message(m) if m.id == last.top_message => Some(m.date),
                tl::enums::Message::Service(m) if m.id == last.top_message => Some(m.date),
                _ => None,
            }) else {
                break;
            };

            let Some(peer) = self.input_peer_for(&last.peer) else {
                break;
            };

            if complete || page_len < DIALOG_PAGE_SIZE as usize {
                break;
            }
            offset_date = date;
            offset_id = last.top_message;
            offset_peer = peer;
        }

        Ok(channels)
    }

    fn input_peer_for(&self, peer: &tl::enums::Peer) -> Option<tl::enums::InputPeer> {
        let peers = self.peers.lock();
        match peer {
            tl::enums::Peer::User(user) => {
                peers
                    .user_hashes
                    .get(&user.user_id)
                    .map(|access_hash| {
                        tl::enums::InputPeer::User(tl::types::InputPeerUser {
                            user_id: user.user_id,
                            access_hash: *access_hash,
                        })
                    })
            }
            tl::enums::Peer::Chat(chat) => Some(tl::enums::InputPeer::Chat(
                tl::types::InputPeerChat {
                    chat_id: chat.chat_id,
                },
            )),
            tl::enums::Peer::Channel(channel) => {
                peers.chats.get(&channel.channel_id).map(input_peer)
            }
        }
    }

    async fn send_to_peer(
        &self,
        peer: tl::enums::InputPeer,
        text: &str,
    ) -> Result<MessageId, SessionError> {
        let request = tl::functions::messages::SendMessage {
            no_webpage: false,
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer,
            reply_to: None,
            message: text.to_owned(),
            random_id: rand::random(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
            rich_message: None,
        };

        let updates = self.client.invoke(&request).await?;
        Ok(sent_message_id(&updates).unwrap_or_default())
    }

    fn incoming_from_updates(&self, updates: tl::enums::Updates) -> Vec<IncomingMessage> {
        match updates {
            tl::enums::Updates::UpdateShortMessage(m) => vec![IncomingMessage {
                id: m.id,
                chat_kind: ChatKind::Private,
                chat_id: m.user_id,
                outgoing: m.out,
                text: m.message,
            }],
            tl::enums::Updates::UpdateShortChatMessage(m) => vec![IncomingMessage {
                id: m.id,
                chat_kind: ChatKind::Group,
                chat_id: m.chat_id,
                outgoing: m.out,
                text: m.message,
            }],
            tl::enums::Updates::UpdateShort(short) => {
                self.peers
                    .lock()
                    .incoming_from_update(short.update)
                    .into_iter()
                    .collect()
            }
            tl::enums::Updates::Updates(batch) => {
                self.remember(&batch.chats, &batch.users);
                batch
                    .updates
                    .into_iter()
                    .filter_map(|update| self.peers.lock().incoming_from_update(update))
                    .collect()
            }
            tl::enums::Updates::Combined(batch) => {
                self.remember(&batch.chats, &batch.users);
                batch
                    .updates
                    .into_iter()
                    .filter_map(|update| self.peers.lock().incoming_from_update(update))
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn remember(&self, chats: &[tl::enums::Chat], users: &[tl::enums::User]) {
        let mut peers = self.peers.lock();
        peers.remember_chats(chats);
        peers.remember_users(users);
    }

    fn reply_peer(&self, incoming: &IncomingMessage) -> Option<tl::enums::InputPeer> {
        let peers = self.peers.lock();
        match incoming.chat_kind {
            ChatKind::Private => peers.user_hashes.get(&incoming.chat_id).map(|access_hash| {
                tl::enums::InputPeer::User(tl::types::InputPeerUser {
                    user_id: incoming.chat_id,
                    access_hash: *access_hash,
                })
            }),
            ChatKind::Group => Some(peers.chats.get(&incoming.chat_id).map_or_else(
                || {
                    tl::enums::InputPeer::Chat(tl::types::InputPeerChat {
                        chat_id: incoming.chat_id,
                    })
                },
                input_peer,
            )),
        }
    }
}

#[async_trait]
impl MessagingSession for TelegramSession {
    fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    async fn is_authorized(&self) -> Result<bool, SessionError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| SessionError::Other(e.to_string()))
    }

    async fn resolve_entity(&self, reference: &str) -> Result<EntityHandle, SessionError> {
        let parsed = DestinationRef::parse(reference)
            .map_err(|e| SessionError::NotFound(e.to_string()))?;

        match parsed {
            DestinationRef::Username(username) => self.resolve_username(&username).await,
            DestinationRef::Invite(hash) => self.resolve_invite(&hash).await,
            DestinationRef::ChannelId(id) => self.resolve_channel_id(id).await,
        }
    }

    async fn send_message(
        &self,
        entity: &EntityHandle,
        text: &str,
    ) -> Result<MessageId, SessionError> {
        debug!(
            "Profile {}: sending \"{}\" to {}",
            self.profile_id,
            truncate_for_log(text, 30),
            entity.title
        );
        self.send_to_peer(input_peer(entity), text).await
    }

    async fn join_destination(&self, entity: &EntityHandle) -> Result<(), SessionError> {
        if !entity.is_channel_like() {
            // Basic groups can only be joined through an invite, which
            // resolving already imported.
            return Ok(());
        }

        info!("Profile {}: joining {}", self.profile_id, entity.title);
        let request = tl::functions::channels::JoinChannel {
            channel: input_channel(entity),
        };
        self.client.invoke(&request).await?;
        Ok(())
    }

    async fn leave_destination(&self, entity: &EntityHandle) -> Result<(), SessionError> {
        info!("Profile {}: leaving {}", self.profile_id, entity.title);

        if entity.is_channel_like() {
            let request = tl::functions::channels::LeaveChannel {
                channel: input_channel(entity),
            };
            self.client.invoke(&request).await?;
        } else {
            let request = tl::functions::messages::DeleteChatUser {
                revoke_history: false,
                chat_id: entity.id,
                user_id: tl::enums::InputUser::UserSelf,
            };
            self.client.invoke(&request).await?;
        }
        Ok(())
    }

    async fn linked_discussion_channel(
        &self,
        entity: &EntityHandle,
    ) -> Result<Option<EntityHandle>, SessionError> {
        if !entity.is_channel_like() {
            return Ok(None);
        }

        let request = tl::functions::channels::GetFullChannel {
            channel: input_channel(entity),
        };
        let tl::enums::messages::ChatFull::Full(full) = self.client.invoke(&request).await?;
        self.peers.lock().remember_chats(&full.chats);

        let tl::enums::ChatFull::ChannelFull(channel_full) = full.full_chat else {
            return Ok(None);
        };
        let Some(linked_id) = channel_full.linked_chat_id else {
            return Ok(None);
        };

        Ok(find_chat(&full.chats, linked_id).ok())
    }

    async fn list_current_memberships(&self) -> Result<Vec<String>, SessionError> {
        let mut memberships: Vec<EntityHandle> = self
            .walk_dialogs()
            .await?
            .iter()
            .filter_map(|chat| match chat {
                tl::enums::Chat::Channel(channel) if !channel.left => handle_from_chat(chat),
                _ => None,
            })
            .collect();
        memberships.sort_by_key(|handle| handle.id);
        memberships.dedup_by_key(|handle| handle.id);
        info!(
            "Profile {}: found {} channel memberships",
            self.profile_id,
            memberships.len()
        );
        Ok(memberships.iter().map(EntityHandle::reference).collect())
    }

    async fn list_restricted_memberships(&self) -> Result<Vec<EntityHandle>, SessionError> {
        let mut restricted: Vec<EntityHandle> = self
            .walk_dialogs()
            .await?
            .iter()
            .filter_map(restricted_handle)
            .collect();
        restricted.sort_by_key(|handle| handle.id);
        restricted.dedup_by_key(|handle| handle.id);
        info!(
            "Profile {}: found {} blocked channel memberships",
            self.profile_id,
            restricted.len()
        );
        Ok(restricted)
    }

    async fn own_username(&self) -> Result<Option<String>, SessionError> {
        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };
        let users = self.client.invoke(&request).await?;

        Ok(users.into_iter().find_map(|user| match user {
            tl::enums::User::User(user) => user.username,
            tl::enums::User::Empty(_) => None,
        }))
    }

    async fn send_reply(
        &self,
        incoming: &IncomingMessage,
        text: &str,
    ) -> Result<MessageId, SessionError> {
        let mut peer = self.reply_peer(incoming);
        if peer.is_none() {
            // Senders of short updates arrive without an access hash.
            self.walk_dialogs().await?;
            peer = self.reply_peer(incoming);
        }
        let peer =
            peer.ok_or_else(|| SessionError::NotFound(format!("chat {}", incoming.chat_id)))?;

        self.send_to_peer(peer, text).await
    }

    async fn next_incoming(&self) -> Option<IncomingMessage> {
        let mut updates = self.updates.lock().await;
        loop {
            let pending = self.pending.lock().pop();
            if pending.is_some() {
                return pending;
            }

            match updates.recv().await? {
                UpdatesLike::Updates(batch) => {
                    let mut parsed = self.incoming_from_updates(batch);
                    parsed.reverse();
                    *self.pending.lock() = parsed;
                }
                _ => continue,
            }
        }
    }

    fn disconnect(&self) {
        info!("Profile {}: disconnecting from Telegram...", self.profile_id);
        self.handle.quit();
    }
}

impl std::fmt::Debug for TelegramSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSession")
            .field("profile_id", &self.profile_id)
            .finish_non_exhaustive()
    }
}

fn handle_from_chat(chat: &tl::enums::Chat) -> Option<EntityHandle> {
    match chat {
        tl::enums::Chat::Channel(channel) => Some(EntityHandle {
            id: channel.id,
            access_hash: channel.access_hash.unwrap_or_default(),
            kind: if channel.megagroup {
                EntityKind::Megagroup
            } else {
                EntityKind::Channel
            },
            title: channel.title.clone(),
            username: channel.username.clone(),
        }),
        tl::enums::Chat::Chat(chat) => Some(EntityHandle {
            id: chat.id,
            access_hash: 0,
            kind: EntityKind::BasicGroup,
            title: chat.title.clone(),
            username: None,
        }),
        _ => None,
    }
}

/// Handle of a channel dialog the account was banned from or muted in.
fn restricted_handle(chat: &tl::enums::Chat) -> Option<EntityHandle> {
    match chat {
        tl::enums::Chat::Channel(channel)
            if !channel.left && cannot_send(channel.banned_rights.as_ref()) =>
        {
            handle_from_chat(chat)
        }
        tl::enums::Chat::ChannelForbidden(forbidden) => Some(EntityHandle {
            id: forbidden.id,
            access_hash: forbidden.access_hash,
            kind: if forbidden.megagroup {
                EntityKind::Megagroup
            } else {
                EntityKind::Channel
            },
            title: forbidden.title.clone(),
            username: None,
        }),
        _ => None,
    }
}

fn cannot_send(rights: Option<&tl::enums::ChatBannedRights>) -> bool {
    matches!(
        rights,
        Some(tl::enums::ChatBannedRights::Rights(rights))
            if rights.view_messages || rights.send_messages
    )
}

fn find_chat(chats: &[tl::enums::Chat], id: i64) -> Result<EntityHandle, SessionError> {
    for chat in chats {
        match chat {
            tl::enums::Chat::ChannelForbidden(forbidden) if forbidden.id == id => {
                return Err(SessionError::EntityPrivate);
            }
            tl::enums::Chat::Forbidden(forbidden) if forbidden.id == id => {
                return Err(SessionError::EntityPrivate);
            }
            _ => {}
        }
        if let Some(handle) = handle_from_chat(chat).filter(|handle| handle.id == id) {
            return Ok(handle);
        }
    }
    Err(SessionError::NotFound(format!("chat {id}")))
}

fn updates_chats(updates: &tl::enums::Updates) -> Vec<tl::enums::Chat> {
    match updates {
        tl::enums::Updates::Updates(batch) => batch.chats.clone(),
        tl::enums::Updates::Combined(batch) => batch.chats.clone(),
        _ => Vec::new(),
    }
}

fn sent_message_id(updates: &tl::enums::Updates) -> Option<MessageId> {
    let batch = match updates {
        tl::enums::Updates::UpdateShortSentMessage(sent) => return Some(sent.id),
        tl::enums::Updates::Updates(batch) => &batch.updates,
        tl::enums::Updates::Combined(batch) => &batch.updates,
        _ => return None,
    };

    batch.iter().find_map(|update| match update {
        tl::enums::Update::MessageId(update) => Some(update.id),
        _ => None,
    })
}

fn input_peer(entity: &EntityHandle) -> tl::enums::InputPeer {
    match entity.kind {
        EntityKind::Channel | EntityKind::Megagroup => {
            tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
                channel_id: entity.id,
                access_hash: entity.access_hash,
            })
        }
        EntityKind::BasicGroup => tl::enums::InputPeer::Chat(tl::types::InputPeerChat {
            chat_id: entity.id,
        }),
        EntityKind::User => tl::enums::InputPeer::User(tl::types::InputPeerUser {
            user_id: entity.id,
            access_hash: entity.access_hash,
        }),
    }
}

fn input_channel(entity: &EntityHandle) -> tl::enums::InputChannel {
    tl::enums::InputChannel::Channel(tl::types::InputChannel {
        channel_id: entity.id,
        access_hash: entity.access_hash,
    })
}

/// Masks a phone number for logging (shows last 4 digits).
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

/// Truncates a string for logging purposes.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn megagroup(id: i64) -> EntityHandle {
        EntityHandle {
            id,
            access_hash: 99,
            kind: EntityKind::Megagroup,
            title: format!("Chat {id}"),
            username: None,
        }
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("Hello", 10), "Hello");
        assert_eq!(truncate_for_log("Hello, World!", 5), "Hello...");
    }

    #[test]
    fn test_find_chat_reports_forbidden_chats() {
        let chats = vec![
            tl::enums::Chat::Empty(tl::types::ChatEmpty { id: 1 }),
            tl::enums::Chat::Forbidden(tl::types::ChatForbidden {
                id: 2,
                title: "Gone".to_owned(),
            }),
        ];
        assert_eq!(find_chat(&chats, 2), Err(SessionError::EntityPrivate));
        assert!(matches!(
            find_chat(&chats, 1),
            Err(SessionError::NotFound(_))
        ));
        assert!(handle_from_chat(&chats[0]).is_none());
    }

    #[test]
    fn test_input_peer_by_kind() {
        let handle = megagroup(5);
        assert!(matches!(
            input_peer(&handle),
            tl::enums::InputPeer::Channel(peer) if peer.channel_id == 5 && peer.access_hash == 99
        ));

        let group = EntityHandle {
            kind: EntityKind::BasicGroup,
            ..handle
        };
        assert!(matches!(
            input_peer(&group),
            tl::enums::InputPeer::Chat(peer) if peer.chat_id == 5
        ));
    }

    #[test]
    fn test_sent_message_id_from_short_update() {
        let update = tl::enums::Updates::UpdateShortSentMessage(tl::types::UpdateShortSentMessage {
            out: true,
            id: 42,
            pts: 0,
            pts_count: 0,
            date: 0,
            media: None,
            entities: None,
            ttl_period: None,
        });
        assert_eq!(sent_message_id(&update), Some(42));
        assert!(updates_chats(&update).is_empty());
    }

    #[test]
    fn test_broadcast_channel_posts_are_not_incoming() {
        let mut peers = PeerBook::default();
        peers.chats.insert(
            10,
            EntityHandle {
                kind: EntityKind::Channel,
                ..megagroup(10)
            },
        );
        peers.chats.insert(20, megagroup(20));

        let channel = |channel_id| tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id });
        assert_eq!(peers.chat_of(&channel(10)), None);
        assert_eq!(peers.chat_of(&channel(20)), Some((ChatKind::Group, 20)));
        assert_eq!(peers.chat_of(&channel(30)), Some((ChatKind::Group, 30)));
        assert_eq!(
            peers.chat_of(&tl::enums::Peer::User(tl::types::PeerUser { user_id: 5 })),
            Some((ChatKind::Private, 5))
        );
        assert_eq!(
            peers.chat_of(&tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: 7 })),
            Some((ChatKind::Group, 7))
        );
    }

    #[test]
    fn test_updates_without_text_messages_are_ignored() {
        let peers = PeerBook::default();
        let empty = tl::enums::Update::NewMessage(tl::types::UpdateNewMessage {
            message: tl::enums::Message::Empty(tl::types::MessageEmpty {
                id: 1,
                peer_id: None,
            }),
            pts: 0,
            pts_count: 0,
        });
        assert_eq!(peers.incoming_from_update(empty), None);
        assert_eq!(peers.incoming_from_update(tl::enums::Update::Config), None);
    }

    #[test]
    fn test_forbidden_channels_count_as_restricted() {
        let kicked = tl::enums::Chat::ChannelForbidden(tl::types::ChannelForbidden {
            broadcast: false,
            megagroup: true,
            monoforum: false,
            id: 44,
            access_hash: 9,
            title: "Kicked".to_owned(),
            until_date: None,
        });
        let handle = restricted_handle(&kicked).unwrap();
        assert_eq!(handle.id, 44);
        assert_eq!(handle.kind, EntityKind::Megagroup);
        assert_eq!(handle.reference(), "https://t.me/c/44");

        let gone = tl::enums::Chat::Forbidden(tl::types::ChatForbidden {
            id: 45,
            title: "Gone".to_owned(),
        });
        assert!(restricted_handle(&gone).is_none());
        assert!(!cannot_send(None));
    }
}
