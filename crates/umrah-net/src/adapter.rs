//! Realtime transport adapter.
//!
//! Owns the single pub/sub connection of the process. On connect it
//! subscribes the actor's private and notification channels, re-subscribes
//! any conversation channels still held by consumers and announces
//! presence. Incoming events are decoded once and fanned out to the
//! registered handlers.
//!
//! Failures never propagate to callers: they are logged and reflected in
//! the [`ConnectionState`] published on a `watch` channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use umrah_shared::models::{ActorIdentity, ChatMessage, ChatNotification, StatusUpdate, TypingSignal};
use umrah_shared::protocol::{ChannelKind, RealtimeEvent};
use umrah_shared::types::{ActorId, ActorRole, ConnectionState, ConversationId};

use crate::api::ChatBackend;
use crate::channels::ChannelTracker;
use crate::error::ApiError;
use crate::registry::{Handler, HandlerRegistry, Subscription};
use crate::transport::{ChannelAuthorizer, Transport, TransportCommand, TransportNotification};

/// Source of the current actor for the adapter.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_actor(&self) -> Option<ActorIdentity>;
}

/// Signs private channels with the connected actor's token.
struct BackendAuthorizer {
    backend: Arc<dyn ChatBackend>,
    token: String,
}

#[async_trait]
impl ChannelAuthorizer for BackendAuthorizer {
    async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String, ApiError> {
        self.backend
            .authorize_channel(&self.token, socket_id, channel)
            .await
    }
}

#[derive(Clone, Default)]
struct Handlers {
    messages: HandlerRegistry<ConversationId, ChatMessage>,
    typing: HandlerRegistry<ConversationId, TypingSignal>,
    notifications: HandlerRegistry<(), ChatNotification>,
    status: HandlerRegistry<(), StatusUpdate>,
}

/// The live connection.
struct Live {
    actor: ActorId,
    token: String,
    socket_id: String,
    commands: mpsc::Sender<TransportCommand>,
    pump: JoinHandle<()>,
}

pub struct RealtimeAdapter {
    transport: Option<Arc<dyn Transport>>,
    backend: Arc<dyn ChatBackend>,
    identity: Arc<dyn IdentityProvider>,
    state: Arc<watch::Sender<ConnectionState>>,
    live: tokio::sync::Mutex<Option<Live>>,
    last_actor: Mutex<Option<(ActorId, ActorRole)>>,
    channels: Arc<Mutex<ChannelTracker>>,
    handlers: Handlers,
    warned_disabled: AtomicBool,
}

impl RealtimeAdapter {
    /// `transport` is `None` when realtime is not configured; every connect
    /// then returns `false`.
    pub fn new(
        transport: Option<Arc<dyn Transport>>,
        backend: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            backend,
            identity,
            state: Arc::new(state),
            live: tokio::sync::Mutex::new(None),
            last_actor: Mutex::new(None),
            channels: Arc::new(Mutex::new(ChannelTracker::new())),
            handlers: Handlers::default(),
            warned_disabled: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Server-assigned id of the live connection.
    pub async fn socket_id(&self) -> Option<String> {
        self.live.lock().await.as_ref().map(|l| l.socket_id.clone())
    }

    /// Open the connection for `actor_id`. Idempotent while connected.
    pub async fn connect(&self, actor_id: ActorId, role: ActorRole) -> bool {
        let mut live = self.live.lock().await;

        if let Some(current) = live.as_ref() {
            if current.actor == actor_id
                && !current.pump.is_finished()
                && self.state().is_connected()
            {
                return true;
            }
        }

        let Some(transport) = self.transport.clone() else {
            if !self.warned_disabled.swap(true, Ordering::Relaxed) {
                warn!("Realtime is not configured; running without live updates");
            }
            return false;
        };

        *self
            .last_actor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((actor_id, role));

        let Some(identity) = self.identity.current_actor().await else {
            debug!(actor = %actor_id, "No credentials for realtime connection");
            set_state(&self.state, ConnectionState::NoAuth);
            return false;
        };
        if identity.id != actor_id {
            warn!(
                requested = %actor_id,
                authenticated = %identity.id,
                "Realtime connect requested for a different actor"
            );
            set_state(&self.state, ConnectionState::NoUser);
            return false;
        }

        // A stale or foreign connection is replaced, keeping conversation
        // references so they are re-subscribed below.
        if let Some(previous) = live.take() {
            let same_actor = previous.actor == actor_id;
            self.teardown(previous, !same_actor).await;
            if !same_actor {
                self.channels
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            }
        }

        set_state(&self.state, ConnectionState::Connecting);
        let authorizer = Arc::new(BackendAuthorizer {
            backend: self.backend.clone(),
            token: identity.token.clone(),
        });
        let handle = match transport.open(authorizer).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(actor = %actor_id, error = %e, "Realtime connection failed");
                set_state(&self.state, ConnectionState::Error);
                return false;
            }
        };

        let pump = tokio::spawn(pump(
            handle.notifications,
            self.handlers.clone(),
            self.channels.clone(),
            self.state.clone(),
        ));

        let names = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels.reset_confirmations();
            channels.add_implicit(ChannelKind::User(actor_id));
            channels.add_implicit(ChannelKind::Notifications(actor_id));
            channels.channel_names()
        };
        for name in names {
            if handle
                .commands
                .send(TransportCommand::Subscribe(name))
                .await
                .is_err()
            {
                warn!(actor = %actor_id, "Transport task ended during subscribe");
                pump.abort();
                set_state(&self.state, ConnectionState::Error);
                return false;
            }
        }

        if let Err(e) = self.backend.set_presence(&identity.token, true).await {
            debug!(error = %e, "Presence online update failed");
        }

        info!(
            actor = %actor_id,
            role = %role,
            socket_id = %handle.socket_id,
            "Realtime connected"
        );
        *live = Some(Live {
            actor: actor_id,
            token: identity.token,
            socket_id: handle.socket_id,
            commands: handle.commands,
            pump,
        });
        set_state(&self.state, ConnectionState::Connected);
        true
    }

    /// Announce offline, drop every channel and close the connection.
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let previous = self.live.lock().await.take();
        if let Some(previous) = previous {
            self.teardown(previous, true).await;
            info!("Realtime disconnected");
        }
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        set_state(&self.state, ConnectionState::Disconnected);
    }

    /// Close and reopen the connection for the last actor, keeping
    /// conversation subscriptions.
    pub async fn reconnect(&self) -> bool {
        self.reopen(false).await
    }

    /// Like [`reconnect`](Self::reconnect), but only while the connection
    /// is dropped or failed. The state is checked under the connection
    /// lock, so of several concurrent callers only the first tears down;
    /// the rest see the restored connection and return `true`.
    pub async fn reconnect_if_needed(&self) -> bool {
        self.reopen(true).await
    }

    async fn reopen(&self, only_if_dropped: bool) -> bool {
        let remembered = *self
            .last_actor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (actor, role) = match remembered {
            Some(pair) => pair,
            None => match self.identity.current_actor().await {
                Some(identity) => (identity.id, identity.role),
                None => {
                    set_state(&self.state, ConnectionState::NoAuth);
                    return false;
                }
            },
        };

        {
            let mut live = self.live.lock().await;
            let state = self.state();
            if only_if_dropped && !state.needs_reconnect() {
                return state.is_connected();
            }
            // Nothing to take means another caller already tore down and
            // will reconnect; `connect` below is idempotent.
            if let Some(previous) = live.take() {
                self.teardown(previous, false).await;
                self.channels
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear_implicit();
                set_state(&self.state, ConnectionState::Disconnected);
            }
        }
        self.connect(actor, role).await
    }

    /// Hold the channel of `id`. Subscribes on the first reference; while
    /// offline the channel is subscribed on the next connect.
    pub async fn subscribe_to_conversation(&self, id: ConversationId) {
        let live = self.live.lock().await;
        let first = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .acquire(id);
        if !first {
            return;
        }
        if let Some(live) = live.as_ref() {
            let name = ChannelKind::Conversation(id).name();
            debug!(channel = %name, "Joining conversation");
            if live
                .commands
                .send(TransportCommand::Subscribe(name))
                .await
                .is_err()
            {
                debug!(conversation = %id, "Transport gone; subscription deferred");
            }
        }
    }

    /// Release one reference on the channel of `id`.
    pub async fn leave_conversation(&self, id: ConversationId) {
        let live = self.live.lock().await;
        let last = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(id);
        if !last {
            return;
        }
        if let Some(live) = live.as_ref() {
            let name = ChannelKind::Conversation(id).name();
            debug!(channel = %name, "Leaving conversation");
            let _ = live.commands.send(TransportCommand::Unsubscribe(name)).await;
        }
    }

    /// Channels currently tracked, implicit first.
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channel_names()
    }

    pub fn on_message(&self, id: ConversationId, handler: Handler<ChatMessage>) -> Subscription {
        self.handlers.messages.register(id, handler)
    }

    pub fn on_typing(&self, id: ConversationId, handler: Handler<TypingSignal>) -> Subscription {
        self.handlers.typing.register(id, handler)
    }

    pub fn on_notification(&self, handler: Handler<ChatNotification>) -> Subscription {
        self.handlers.notifications.register((), handler)
    }

    pub fn on_status_update(&self, handler: Handler<StatusUpdate>) -> Subscription {
        self.handlers.status.register((), handler)
    }

    pub fn off_message(&self, subscription: Subscription) {
        subscription.dispose();
    }

    pub fn off_typing(&self, subscription: Subscription) {
        subscription.dispose();
    }

    pub fn off_notification(&self, subscription: Subscription) {
        subscription.dispose();
    }

    pub fn off_status_update(&self, subscription: Subscription) {
        subscription.dispose();
    }

    async fn teardown(&self, live: Live, announce_offline: bool) {
        if announce_offline {
            if let Err(e) = self.backend.set_presence(&live.token, false).await {
                debug!(error = %e, "Presence offline update failed");
            }
        }
        let names = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channel_names();
        for name in names {
            if live
                .commands
                .send(TransportCommand::Unsubscribe(name))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = live.commands.send(TransportCommand::Shutdown).await;
        live.pump.abort();
    }
}

fn set_state(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let mut previous = next;
    let changed = state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        previous = *current;
        *current = next;
        true
    });
    if changed {
        debug!(from = %previous, to = %next, "Connection state changed");
    }
}

async fn pump(
    mut notifications: mpsc::Receiver<TransportNotification>,
    handlers: Handlers,
    channels: Arc<Mutex<ChannelTracker>>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            TransportNotification::Subscribed { channel } => {
                debug!(channel = %channel, "Subscription confirmed");
                channels
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .confirm(&channel);
            }
            TransportNotification::SubscriptionFailed { channel, reason } => {
                warn!(channel = %channel, reason = %reason, "Subscription rejected");
            }
            TransportNotification::Event {
                channel,
                event,
                data,
            } => dispatch(&handlers, &channel, &event, &data),
            TransportNotification::Error { message } => {
                warn!(error = %message, "Realtime transport error");
                set_state(&state, ConnectionState::Error);
            }
            TransportNotification::Closed => break,
        }
    }

    channels
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .reset_confirmations();
    let current = *state.borrow();
    if matches!(
        current,
        ConnectionState::Connected | ConnectionState::Connecting
    ) {
        info!("Realtime connection lost");
        set_state(&state, ConnectionState::Disconnected);
    }
}

fn dispatch(handlers: &Handlers, channel: &str, event: &str, data: &str) {
    let kind = match ChannelKind::parse(channel) {
        Ok(kind) => kind,
        Err(e) => {
            debug!(channel = %channel, error = %e, "Event on unknown channel");
            return;
        }
    };

    match RealtimeEvent::decode(&kind, event, data) {
        Ok(Some(RealtimeEvent::Message(message))) => {
            handlers.messages.emit(&message.conversation_id, &message);
        }
        Ok(Some(RealtimeEvent::Typing(signal))) => {
            handlers.typing.emit(&signal.conversation_id, &signal);
        }
        Ok(Some(RealtimeEvent::Notification(notification))) => {
            handlers.notifications.emit(&(), &notification);
        }
        Ok(Some(RealtimeEvent::Status(update))) => {
            handlers.status.emit(&(), &update);
        }
        Ok(None) => debug!(channel = %channel, event = %event, "Ignoring event"),
        Err(e) => warn!(channel = %channel, event = %event, error = %e, "Dropping malformed event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryHub, MemoryTransport};
    use crate::registry::handler;
    use crate::testing::{test_actor, FakeBackend, StaticIdentity};

    struct Fixture {
        adapter: RealtimeAdapter,
        hub: MemoryHub,
        backend: FakeBackend,
        identity: StaticIdentity,
    }

    fn fixture() -> Fixture {
        let (transport, hub) = MemoryTransport::new();
        let backend = FakeBackend::new();
        let identity = StaticIdentity::new(Some(test_actor(5, ActorRole::Office)));
        let adapter = RealtimeAdapter::new(
            Some(Arc::new(transport)),
            Arc::new(backend.clone()),
            Arc::new(identity.clone()),
        );
        Fixture {
            adapter,
            hub,
            backend,
            identity,
        }
    }

    async fn settle_until(mut done: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
        assert!(done(), "condition not reached");
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let f = fixture();
        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);
        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);

        settle_until(|| f.hub.subscribe_log().len() >= 2).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert_eq!(f.hub.open_count(), 1);
        assert_eq!(
            f.hub.subscribe_log(),
            vec!["private-notifications.5".to_string(), "private-user.5".to_string()]
        );
        assert_eq!(f.backend.count("presence:online"), 1);
        assert_eq!(f.adapter.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_without_credentials() {
        let f = fixture();
        f.identity.set(None);
        assert!(!f.adapter.connect(ActorId(5), ActorRole::Office).await);
        assert_eq!(f.adapter.state(), ConnectionState::NoAuth);
        assert_eq!(f.hub.open_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_for_other_actor_is_refused() {
        let f = fixture();
        assert!(!f.adapter.connect(ActorId(6), ActorRole::Office).await);
        assert_eq!(f.adapter.state(), ConnectionState::NoUser);
    }

    #[tokio::test]
    async fn test_realtime_disabled_returns_false() {
        let backend = FakeBackend::new();
        let adapter = RealtimeAdapter::new(
            None,
            Arc::new(backend.clone()),
            Arc::new(StaticIdentity::new(Some(test_actor(5, ActorRole::Pilgrim)))),
        );
        assert!(!adapter.is_enabled());
        assert!(!adapter.connect(ActorId(5), ActorRole::Pilgrim).await);
        assert!(!adapter.connect(ActorId(5), ActorRole::Pilgrim).await);
        assert_eq!(adapter.state(), ConnectionState::Disconnected);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_sets_error() {
        let f = fixture();
        f.hub.fail_next_opens(1);
        assert!(!f.adapter.connect(ActorId(5), ActorRole::Office).await);
        assert_eq!(f.adapter.state(), ConnectionState::Error);

        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);
        assert_eq!(f.adapter.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_events_reach_handlers_in_order() {
        let f = fixture();
        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);
        f.adapter.subscribe_to_conversation(ConversationId(42)).await;
        settle_until(|| f.hub.subscriptions().len() == 3).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let _a = f.adapter.on_message(
            ConversationId(42),
            handler(move |m: &ChatMessage| first.lock().unwrap().push(format!("a:{}", m.body))),
        );
        let second = seen.clone();
        let _b = f.adapter.on_message(
            ConversationId(42),
            handler(move |m: &ChatMessage| second.lock().unwrap().push(format!("b:{}", m.body))),
        );
        let notes = Arc::new(Mutex::new(Vec::new()));
        let sink = notes.clone();
        let _n = f.adapter.on_notification(handler(move |n: &ChatNotification| {
            sink.lock().unwrap().push(n.conversation_id)
        }));

        let data = r#"{"id":1,"sender_id":9,"message":"Salam","created_at":"2026-03-01T10:00:00Z"}"#;
        assert!(f.hub.publish("private-chat.42", ".message.sent", data).await);
        let note = r#"{"id":"n1","chat_id":42,"sender_id":9,"message":"Salam"}"#;
        assert!(f.hub.publish("private-notifications.5", "new-notification", note).await);
        assert!(f.hub.publish("private-chat.42", "message.sent", "not json").await);

        settle_until(|| notes.lock().unwrap().len() == 1).await;
        assert_eq!(*seen.lock().unwrap(), vec!["a:Salam", "b:Salam"]);
        assert_eq!(*notes.lock().unwrap(), vec![ConversationId(42)]);
    }

    #[tokio::test]
    async fn test_conversation_channel_is_shared() {
        let f = fixture();
        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);
        f.adapter.subscribe_to_conversation(ConversationId(42)).await;
        f.adapter.subscribe_to_conversation(ConversationId(42)).await;
        settle_until(|| f.hub.subscriptions().len() == 3).await;

        f.adapter.leave_conversation(ConversationId(42)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(f.hub.subscriptions().contains(&"private-chat.42".to_string()));

        f.adapter.leave_conversation(ConversationId(42)).await;
        settle_until(|| f.hub.subscriptions().len() == 2).await;
    }

    #[tokio::test]
    async fn test_disconnect_is_repeatable() {
        let f = fixture();
        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);
        f.adapter.disconnect().await;
        f.adapter.disconnect().await;

        assert_eq!(f.adapter.state(), ConnectionState::Disconnected);
        assert_eq!(f.backend.count("presence:offline"), 1);
        assert!(f.adapter.channels().is_empty());
        settle_until(|| !f.hub.is_connected()).await;
    }

    #[tokio::test]
    async fn test_dropped_connection_then_reconnect_resubscribes() {
        let f = fixture();
        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);
        f.adapter.subscribe_to_conversation(ConversationId(42)).await;
        settle_until(|| f.hub.subscriptions().len() == 3).await;

        let mut state = f.adapter.watch_state();
        f.hub.drop_connection().await;
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(state.borrow().needs_reconnect());

        assert!(f.adapter.reconnect().await);
        settle_until(|| f.hub.subscriptions().len() == 3).await;
        assert!(f.hub.subscriptions().contains(&"private-chat.42".to_string()));
        assert_eq!(f.hub.open_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_restores_open_one_connection() {
        let f = fixture();
        assert!(f.adapter.connect(ActorId(5), ActorRole::Office).await);
        f.adapter.subscribe_to_conversation(ConversationId(42)).await;
        settle_until(|| f.hub.subscriptions().len() == 3).await;

        let mut state = f.adapter.watch_state();
        f.hub.drop_connection().await;
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            f.adapter.reconnect_if_needed(),
            f.adapter.reconnect_if_needed()
        );
        assert!(first && second);
        assert_eq!(f.hub.open_count(), 2);
        assert_eq!(f.adapter.state(), ConnectionState::Connected);

        // Healthy connection: nothing is torn down.
        assert!(f.adapter.reconnect_if_needed().await);
        assert_eq!(f.hub.open_count(), 2);
        settle_until(|| f.hub.subscriptions().len() == 3).await;
    }
}
