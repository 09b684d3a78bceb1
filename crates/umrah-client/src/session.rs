//! Per-conversation chat session.
//!
//! A session is mounted by a conversation view. It joins the open
//! conversation's channel, keeps the message timeline and the typing map,
//! and watches connection health. Unmounting (or dropping) the session
//! releases everything it holds; results of requests still in flight are
//! discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use umrah_net::{
    handler, Backoff, ChatBackend, Handler, IdentityProvider, RealtimeAdapter, Subscription,
};
use umrah_shared::constants::{RECONNECT_MAX_ATTEMPTS, TYPING_EXPIRY_MS};
use umrah_shared::models::{ChatMessage, ContentType, StatusUpdate, TypingSignal};
use umrah_shared::types::{ActorId, ActorRole, ConnectionState, ConversationId, MessageId};

use crate::error::{ChatError, Result};
use crate::events::{Toast, ToastSink};
use crate::notifications::NotificationAggregator;
use crate::rooms::RoomDirectory;
use crate::timeline::MessageTimeline;

/// Someone currently typing in the open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: ActorId,
    pub display_name: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Optional UI callbacks.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    pub on_new_message: Option<Handler<ChatMessage>>,
    pub on_typing_indicator: Option<Handler<Vec<TypingUser>>>,
    pub on_connection_status_change: Option<Handler<ConnectionState>>,
}

/// Process-wide services a session works with.
#[derive(Clone)]
pub struct SessionContext {
    pub adapter: Arc<RealtimeAdapter>,
    pub backend: Arc<dyn ChatBackend>,
    pub identity: Arc<dyn IdentityProvider>,
    pub aggregator: NotificationAggregator,
    pub rooms: Arc<Mutex<RoomDirectory>>,
    pub toasts: Arc<dyn ToastSink>,
    pub liveness_interval: Duration,
}

struct TypingEntry {
    user: TypingUser,
    seq: u64,
    expiry: JoinHandle<()>,
}

#[derive(Default)]
struct SessionState {
    conversation: Option<ConversationId>,
    /// Bumped whenever the conversation changes; stale results compare it.
    generation: u64,
    /// Conversation whose channel this session actually holds.
    joined: Option<ConversationId>,
    timeline: Option<MessageTimeline>,
    typing: HashMap<ActorId, TypingEntry>,
    typing_seq: u64,
    subscriptions: Vec<Subscription>,
    own_id: Option<ActorId>,
}

struct Inner {
    ctx: SessionContext,
    role: ActorRole,
    callbacks: SessionCallbacks,
    mounted: AtomicBool,
    state: Mutex<SessionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Mount a session, optionally with a conversation already open.
    pub async fn mount(
        ctx: SessionContext,
        conversation: Option<ConversationId>,
        role: ActorRole,
        callbacks: SessionCallbacks,
    ) -> Self {
        let liveness_interval = ctx.liveness_interval;
        let state_rx = ctx.adapter.watch_state();
        let inner = Arc::new(Inner {
            ctx,
            role,
            callbacks,
            mounted: AtomicBool::new(true),
            state: Mutex::new(SessionState::default()),
            tasks: Mutex::new(Vec::new()),
        });

        {
            let mut tasks = inner.tasks();
            tasks.push(tokio::spawn(liveness(
                Arc::downgrade(&inner),
                liveness_interval,
            )));
            tasks.push(tokio::spawn(watch_connection(
                Arc::downgrade(&inner),
                state_rx,
            )));
        }

        let session = Self { inner };
        session.set_conversation(conversation).await;
        session
    }

    /// Switch to another conversation (or to none). The previous channel is
    /// left and its handlers deregistered before the new one is joined.
    pub async fn set_conversation(&self, next: Option<ConversationId>) {
        let inner = &self.inner;
        if !inner.is_mounted() {
            return;
        }

        let (left, subscriptions, had_typing, generation) = {
            let mut state = inner.lock();
            if state.conversation == next && (next.is_none() || state.joined == next) {
                return;
            }
            let had_typing = clear_typing(&mut state);
            let subscriptions = std::mem::take(&mut state.subscriptions);
            let left = state.joined.take();
            if state.conversation != next {
                state.timeline = next.map(MessageTimeline::new);
            }
            state.conversation = next;
            state.generation += 1;
            (left, subscriptions, had_typing, state.generation)
        };
        drop(subscriptions);

        if let Some(id) = left {
            inner.ctx.adapter.leave_conversation(id).await;
            debug!(conversation = %id, "Left conversation");
        }
        if had_typing {
            inner.emit_typing();
        }
        inner.ctx.aggregator.set_active_conversation(next);
        inner.rooms().set_open(next);

        if let Some(id) = next {
            inner.bind(id, generation).await;
        }
    }

    pub fn conversation(&self) -> Option<ConversationId> {
        self.inner.lock().conversation
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.ctx.adapter.state()
    }

    /// Messages of the open conversation, in display order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .timeline
            .as_ref()
            .map(|t| t.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.inner.typing_snapshot()
    }

    /// Tell the other participants whether we are typing. No-op when no
    /// conversation is open.
    pub async fn send_typing_indicator(&self, is_typing: bool) {
        let inner = &self.inner;
        let Ok((id, _)) = inner.current() else {
            return;
        };
        let Some(actor) = inner.ctx.identity.current_actor().await else {
            return;
        };
        if let Err(e) = inner
            .ctx
            .backend
            .send_typing(&actor.token, id, is_typing)
            .await
        {
            debug!(conversation = %id, error = %e, "Typing update failed");
        }
    }

    /// Force a disconnect and reconnect of the realtime connection.
    pub async fn retry_connection(&self) -> bool {
        let inner = &self.inner;
        info!("Manual reconnect requested");
        let connected = inner.ctx.adapter.reconnect().await;
        if !connected {
            if inner.is_mounted() {
                inner.ctx.toasts.show(Toast::error("Could not reconnect to chat"));
            }
            return false;
        }

        // A conversation opened while signed out was never joined.
        let pending = {
            let state = inner.lock();
            match (state.conversation, state.joined) {
                (Some(id), None) => Some((id, state.generation)),
                _ => None,
            }
        };
        if let Some((id, generation)) = pending {
            inner.bind(id, generation).await;
        }
        true
    }

    /// Load the conversation history, keeping unsent local messages.
    pub async fn load_history(&self) -> Result<usize> {
        let inner = &self.inner;
        let (id, generation) = inner.current()?;
        let actor = inner
            .ctx
            .identity
            .current_actor()
            .await
            .ok_or(ChatError::NotAuthenticated)?;

        let history = inner
            .ctx
            .backend
            .list_messages(&actor.token, id)
            .await
            .map_err(|e| {
                warn!(conversation = %id, error = %e, "History load failed");
                e
            })?;

        if !inner.is_current(generation) {
            return Err(ChatError::Unmounted);
        }
        let mut state = inner.lock();
        let timeline = state.timeline.as_mut().ok_or(ChatError::NoConversation)?;
        timeline.replace_history(history);
        debug!(conversation = %id, messages = timeline.len(), "History loaded");
        Ok(timeline.len())
    }

    /// Send a message optimistically: it shows up as `sending` at once and
    /// becomes `sent` on the backend's ack, or `failed` with a toast.
    pub async fn send_message(&self, body: &str, content_type: ContentType) -> Result<MessageId> {
        let inner = &self.inner;
        let (id, generation) = inner.current()?;
        let Some(actor) = inner.ctx.identity.current_actor().await else {
            inner.ctx.toasts.show(Toast::error("Sign in to send messages"));
            return Err(ChatError::NotAuthenticated);
        };

        let pending = {
            let mut state = inner.lock();
            if state.generation != generation {
                return Err(ChatError::NoConversation);
            }
            let timeline = state.timeline.as_mut().ok_or(ChatError::NoConversation)?;
            let local = timeline.push_local(
                actor.id,
                &actor.display_name,
                body,
                content_type,
                Utc::now(),
            );
            timeline.get(local).cloned()
        };
        let Some(pending) = pending else {
            return Err(ChatError::UnknownMessage);
        };
        if let Some(callback) = &inner.callbacks.on_new_message {
            callback(&pending);
        }

        inner
            .deliver(id, generation, pending.id, &actor.token, body, content_type)
            .await
    }

    /// Send a `failed` message again with its original content.
    pub async fn resend(&self, local: MessageId) -> Result<MessageId> {
        let inner = &self.inner;
        let (id, generation) = inner.current()?;
        let actor = inner
            .ctx
            .identity
            .current_actor()
            .await
            .ok_or(ChatError::NotAuthenticated)?;

        let message = inner
            .lock()
            .timeline
            .as_mut()
            .and_then(|t| t.retry(local))
            .ok_or(ChatError::UnknownMessage)?;

        inner
            .deliver(
                id,
                generation,
                local,
                &actor.token,
                &message.body,
                message.content_type,
            )
            .await
    }

    /// Mark the open conversation read on the backend and in the room list.
    pub async fn mark_conversation_read(&self) -> Result<()> {
        let inner = &self.inner;
        let (id, _) = inner.current()?;
        let actor = inner
            .ctx
            .identity
            .current_actor()
            .await
            .ok_or(ChatError::NotAuthenticated)?;

        if let Err(e) = inner.ctx.backend.mark_chat_read(&actor.token, id).await {
            warn!(conversation = %id, error = %e, "Mark conversation read failed");
            return Err(e.into());
        }
        inner.rooms().mark_read(id);
        Ok(())
    }

    /// Leave the conversation and stop every timer. Idempotent.
    pub async fn unmount(&self) {
        if let Some(joined) = self.inner.shutdown() {
            if let Some(id) = joined {
                self.inner.ctx.adapter.leave_conversation(id).await;
            }
            info!("Chat session unmounted");
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        let Some(Some(id)) = self.inner.shutdown() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let adapter = self.inner.ctx.adapter.clone();
                runtime.spawn(async move {
                    adapter.leave_conversation(id).await;
                });
            }
            Err(_) => warn!(conversation = %id, "Session dropped outside a runtime"),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rooms(&self) -> MutexGuard<'_, RoomDirectory> {
        self.ctx.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_mounted() && self.lock().generation == generation
    }

    fn current(&self) -> Result<(ConversationId, u64)> {
        if !self.is_mounted() {
            return Err(ChatError::Unmounted);
        }
        let state = self.lock();
        state
            .conversation
            .map(|id| (id, state.generation))
            .ok_or(ChatError::NoConversation)
    }

    /// Stop the session. Returns `None` if it was already stopped,
    /// otherwise the conversation whose channel must still be left.
    fn shutdown(&self) -> Option<Option<ConversationId>> {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return None;
        }
        for task in self.tasks().drain(..) {
            task.abort();
        }
        let (joined, conversation, subscriptions) = {
            let mut state = self.lock();
            clear_typing(&mut state);
            state.generation += 1;
            (
                state.joined.take(),
                state.conversation,
                std::mem::take(&mut state.subscriptions),
            )
        };
        drop(subscriptions);

        if conversation.is_some() {
            let mut rooms = self.rooms();
            if rooms.open() == conversation {
                rooms.set_open(None);
                self.ctx.aggregator.set_active_conversation(None);
            }
        }
        Some(joined)
    }

    async fn bind(self: &Arc<Self>, id: ConversationId, generation: u64) {
        let Some(actor) = self.ctx.identity.current_actor().await else {
            debug!(conversation = %id, "No identity, conversation not joined");
            return;
        };
        if !self.is_current(generation) {
            return;
        }
        self.lock().own_id = Some(actor.id);

        let adapter = &self.ctx.adapter;
        if !adapter.state().is_connected() {
            adapter.connect(actor.id, self.role).await;
        }

        let subscriptions = self.register_handlers(id);
        let accepted = {
            let mut state = self.lock();
            if self.is_mounted() && state.generation == generation {
                state.subscriptions = subscriptions;
                true
            } else {
                false
            }
        };
        if !accepted {
            return;
        }

        adapter.subscribe_to_conversation(id).await;
        let stale = {
            let mut state = self.lock();
            if self.is_mounted() && state.generation == generation {
                state.joined = Some(id);
                false
            } else {
                true
            }
        };
        if stale {
            adapter.leave_conversation(id).await;
            return;
        }
        info!(conversation = %id, actor = %actor.id, "Joined conversation");
    }

    fn register_handlers(self: &Arc<Self>, id: ConversationId) -> Vec<Subscription> {
        let adapter = &self.ctx.adapter;

        let weak = Arc::downgrade(self);
        let on_message = handler(move |message: &ChatMessage| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(message);
            }
        });
        let weak = Arc::downgrade(self);
        let on_typing = handler(move |signal: &TypingSignal| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_typing(signal);
            }
        });
        let weak = Arc::downgrade(self);
        let on_status = handler(move |update: &StatusUpdate| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_status(update);
            }
        });

        vec![
            adapter.on_message(id, on_message),
            adapter.on_typing(id, on_typing),
            adapter.on_status_update(on_status),
        ]
    }

    fn handle_message(&self, message: &ChatMessage) {
        if !self.is_mounted() {
            return;
        }
        let (changed, own_id, typing_cleared) = {
            let mut state = self.lock();
            let changed = match state.timeline.as_mut() {
                Some(timeline) if timeline.conversation() == message.conversation_id => {
                    timeline.upsert(message.clone())
                }
                _ => return,
            };
            // A message ends its sender's typing indicator.
            let typing_cleared = state
                .typing
                .remove(&message.sender_id)
                .map(|entry| entry.expiry.abort())
                .is_some();
            (changed, state.own_id, typing_cleared)
        };

        self.rooms().apply_message(message, own_id);
        if typing_cleared {
            self.emit_typing();
        }
        if changed {
            if let Some(callback) = &self.callbacks.on_new_message {
                callback(message);
            }
        }
    }

    fn handle_typing(self: &Arc<Self>, signal: &TypingSignal) {
        if !self.is_mounted() {
            return;
        }
        let changed = {
            let mut state = self.lock();
            if state.conversation != Some(signal.conversation_id)
                || state.own_id == Some(signal.user_id)
            {
                return;
            }
            if signal.is_typing {
                state.typing_seq += 1;
                let seq = state.typing_seq;
                let expiry = tokio::spawn(expire_typing(Arc::downgrade(self), signal.user_id, seq));
                let entry = TypingEntry {
                    user: TypingUser {
                        user_id: signal.user_id,
                        display_name: signal.user_display_name.clone(),
                        last_seen_at: signal.observed_at,
                    },
                    seq,
                    expiry,
                };
                if let Some(previous) = state.typing.insert(signal.user_id, entry) {
                    previous.expiry.abort();
                }
                true
            } else {
                state
                    .typing
                    .remove(&signal.user_id)
                    .map(|entry| entry.expiry.abort())
                    .is_some()
            }
        };
        if changed {
            self.emit_typing();
        }
    }

    fn handle_status(&self, update: &StatusUpdate) {
        match update {
            StatusUpdate::Message(update) => {
                let mut state = self.lock();
                if let Some(timeline) = state.timeline.as_mut() {
                    timeline.apply_status(update);
                }
            }
            StatusUpdate::Presence(presence) => {
                debug!(user = %presence.user_id, online = presence.online, "Presence update");
            }
        }
    }

    fn typing_snapshot(&self) -> Vec<TypingUser> {
        let mut users: Vec<TypingUser> = self
            .lock()
            .typing
            .values()
            .map(|entry| entry.user.clone())
            .collect();
        users.sort_by_key(|user| user.user_id);
        users
    }

    fn emit_typing(&self) {
        if let Some(callback) = &self.callbacks.on_typing_indicator {
            callback(&self.typing_snapshot());
        }
    }

    async fn deliver(
        &self,
        id: ConversationId,
        generation: u64,
        local: MessageId,
        token: &str,
        body: &str,
        content_type: ContentType,
    ) -> Result<MessageId> {
        let result = self
            .ctx
            .backend
            .send_message(token, id, body, content_type)
            .await;
        let current = self.is_current(generation);

        match result {
            Ok(remote) => {
                if !current {
                    debug!(conversation = %id, "Send ack after unmount discarded");
                    return Err(ChatError::Unmounted);
                }
                if let Some(timeline) = self.lock().timeline.as_mut() {
                    timeline.acknowledge(local, &remote);
                }
                debug!(conversation = %id, message = %remote.id, "Message sent");
                Ok(remote.id)
            }
            Err(e) => {
                warn!(conversation = %id, error = %e, "Message send failed");
                if !current {
                    return Err(ChatError::Unmounted);
                }
                if let Some(timeline) = self.lock().timeline.as_mut() {
                    timeline.fail(local);
                }
                self.toasts().show(Toast::error("Message could not be sent"));
                Err(e.into())
            }
        }
    }

    fn toasts(&self) -> &dyn ToastSink {
        self.ctx.toasts.as_ref()
    }
}

/// Abort every typing timer; returns whether anyone was typing.
fn clear_typing(state: &mut SessionState) -> bool {
    let had_typing = !state.typing.is_empty();
    for (_, entry) in state.typing.drain() {
        entry.expiry.abort();
    }
    had_typing
}

async fn expire_typing(inner: Weak<Inner>, user: ActorId, seq: u64) {
    tokio::time::sleep(Duration::from_millis(TYPING_EXPIRY_MS)).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let expired = {
        let mut state = inner.lock();
        match state.typing.get(&user) {
            Some(entry) if entry.seq == seq => {
                state.typing.remove(&user);
                true
            }
            _ => false,
        }
    };
    if expired {
        debug!(user = %user, "Typing indicator expired");
        inner.emit_typing();
    }
}

/// Forward connection state changes to the UI callback.
async fn watch_connection(inner: Weak<Inner>, mut state: watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.is_mounted() {
            break;
        }
        if let Some(callback) = &inner.callbacks.on_connection_status_change {
            callback(&current);
        }
    }
}

/// Periodic health check: silently reconnect a dropped connection with a
/// bounded, capped exponential backoff.
async fn liveness(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backoff = Backoff::default();

    loop {
        ticker.tick().await;
        let adapter = match inner.upgrade() {
            Some(session) if session.is_mounted() => session.ctx.adapter.clone(),
            _ => break,
        };
        if !adapter.is_enabled() || !adapter.state().needs_reconnect() {
            continue;
        }

        debug!(state = %adapter.state(), "Liveness check reconnecting");
        for _ in 0..RECONNECT_MAX_ATTEMPTS {
            if adapter.reconnect_if_needed().await {
                backoff.reset();
                info!("Realtime connection restored");
                break;
            }
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Reconnect failed, backing off");
            tokio::time::sleep(delay).await;
            if !inner.upgrade().is_some_and(|session| session.is_mounted()) {
                return;
            }
        }
    }
}
