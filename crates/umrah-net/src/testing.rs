//! In-process doubles for the backend and identity seams.
//!
//! Compiled for this crate's tests and, through the `testing` feature, for
//! the tests of downstream crates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use umrah_shared::models::{ActorIdentity, ChatMessage, ChatRoom, ContentType, MessageStatus};
use umrah_shared::types::{ActorId, ActorRole, ConversationId, MessageId, NotificationId};

use crate::adapter::IdentityProvider;
use crate::api::{ChatBackend, UserProfile};
use crate::error::ApiError;

/// Identity with a token valid for one hour.
pub fn test_actor(id: u64, role: ActorRole) -> ActorIdentity {
    ActorIdentity {
        id: ActorId(id),
        display_name: format!("actor-{id}"),
        role,
        token: format!("token-{id}"),
        token_expiry: Utc::now() + ChronoDuration::hours(1),
    }
}

/// [`IdentityProvider`] returning a fixed, swappable identity.
#[derive(Clone, Default)]
pub struct StaticIdentity {
    actor: Arc<Mutex<Option<ActorIdentity>>>,
}

impl StaticIdentity {
    pub fn new(actor: Option<ActorIdentity>) -> Self {
        Self {
            actor: Arc::new(Mutex::new(actor)),
        }
    }

    pub fn set(&self, actor: Option<ActorIdentity>) {
        *self.actor.lock().unwrap_or_else(PoisonError::into_inner) = actor;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_actor(&self) -> Option<ActorIdentity> {
        self.actor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct FakeState {
    calls: Vec<String>,
    unread: Result<u32, u16>,
    mark_success: bool,
    fail_status: Option<u16>,
    send_fails: bool,
    send_delay: Duration,
    profiles: HashMap<String, UserProfile>,
    profile_delay: Duration,
    rooms: Vec<ChatRoom>,
    history: HashMap<ConversationId, Vec<ChatMessage>>,
    next_message_id: u64,
    sender: ActorId,
}

/// Scriptable [`ChatBackend`] that records every call.
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                calls: Vec::new(),
                unread: Ok(0),
                mark_success: true,
                fail_status: None,
                send_fails: false,
                send_delay: Duration::ZERO,
                profiles: HashMap::new(),
                profile_delay: Duration::ZERO,
                rooms: Vec::new(),
                history: HashMap::new(),
                next_message_id: 100,
                sender: ActorId(1),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.fail_status {
            Some(401) => Err(ApiError::Unauthorized),
            Some(status) => Err(ApiError::Status(status)),
            None => Ok(()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn set_unread(&self, count: u32) {
        self.lock().unread = Ok(count);
    }

    pub fn fail_unread(&self, status: u16) {
        self.lock().unread = Err(status);
    }

    /// Value of `success` in mark/delete responses.
    pub fn set_mark_success(&self, success: bool) {
        self.lock().mark_success = success;
    }

    /// Make every call fail with `status` (`None` restores success).
    pub fn fail_all(&self, status: Option<u16>) {
        self.lock().fail_status = status;
    }

    pub fn set_send_fails(&self, fails: bool) {
        self.lock().send_fails = fails;
    }

    /// Delay before `send_message` answers.
    pub fn set_send_delay(&self, delay: Duration) {
        self.lock().send_delay = delay;
    }

    pub fn add_profile(&self, token: &str, profile: UserProfile) {
        self.lock().profiles.insert(token.to_string(), profile);
    }

    pub fn set_profile_delay(&self, delay: Duration) {
        self.lock().profile_delay = delay;
    }

    pub fn set_rooms(&self, rooms: Vec<ChatRoom>) {
        self.lock().rooms = rooms;
    }

    pub fn set_history(&self, conversation: ConversationId, messages: Vec<ChatMessage>) {
        self.lock().history.insert(conversation, messages);
    }

    pub fn set_sender(&self, sender: ActorId) {
        self.lock().sender = sender;
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn authorize_channel(
        &self,
        _token: &str,
        socket_id: &str,
        channel: &str,
    ) -> Result<String, ApiError> {
        self.record(format!("authorize:{channel}"))?;
        Ok(format!("fake:{socket_id}:{channel}"))
    }

    async fn set_presence(&self, _token: &str, online: bool) -> Result<(), ApiError> {
        let call = if online { "presence:online" } else { "presence:offline" };
        self.record(call.to_string())
    }

    async fn unread_count(&self, _token: &str) -> Result<u32, ApiError> {
        self.record("unread_count".into())?;
        self.lock().unread.map_err(ApiError::Status)
    }

    async fn mark_all_notifications_read(&self, _token: &str) -> Result<bool, ApiError> {
        self.record("mark_all_read".into())?;
        Ok(self.lock().mark_success)
    }

    async fn mark_notification_read(
        &self,
        _token: &str,
        id: &NotificationId,
    ) -> Result<bool, ApiError> {
        self.record(format!("mark_read:{id}"))?;
        Ok(self.lock().mark_success)
    }

    async fn delete_notification(
        &self,
        _token: &str,
        id: &NotificationId,
    ) -> Result<bool, ApiError> {
        self.record(format!("delete:{id}"))?;
        Ok(self.lock().mark_success)
    }

    async fn list_chats(&self, _token: &str) -> Result<Vec<ChatRoom>, ApiError> {
        self.record("list_chats".into())?;
        Ok(self.lock().rooms.clone())
    }

    async fn list_messages(
        &self,
        _token: &str,
        conversation: ConversationId,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        self.record(format!("list_messages:{conversation}"))?;
        Ok(self
            .lock()
            .history
            .get(&conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        _token: &str,
        conversation: ConversationId,
        body: &str,
        content_type: ContentType,
    ) -> Result<ChatMessage, ApiError> {
        self.record(format!("send_message:{conversation}"))?;
        let delay = self.lock().send_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if state.send_fails {
            return Err(ApiError::Status(503));
        }
        state.next_message_id += 1;
        Ok(ChatMessage {
            id: MessageId::Remote(state.next_message_id),
            conversation_id: conversation,
            sender_id: state.sender,
            sender_display_name: String::new(),
            body: body.to_string(),
            content_type,
            status: MessageStatus::Sent,
            sent_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        })
    }

    async fn send_typing(
        &self,
        _token: &str,
        conversation: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApiError> {
        self.record(format!("typing:{conversation}:{is_typing}"))
    }

    async fn mark_chat_read(
        &self,
        _token: &str,
        conversation: ConversationId,
    ) -> Result<(), ApiError> {
        self.record(format!("mark_chat_read:{conversation}"))
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        let delay = self.lock().profile_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record("profile".into())?;
        self.lock()
            .profiles
            .get(token)
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}
