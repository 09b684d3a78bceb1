//! The chat core: one explicitly constructed set of services shared by
//! every view of the application.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use umrah_net::{
    handler, ApiClient, ChatBackend, IdentityProvider, PusherTransport, RealtimeAdapter,
    Subscription, Transport,
};
use umrah_shared::models::{ActorIdentity, ChatNotification, ChatRoom};
use umrah_shared::types::{ActorRole, ConversationId};

use crate::auth::{AuthBridge, SessionProvider, TokenStore};
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::events::ToastSink;
use crate::notifications::NotificationAggregator;
use crate::rooms::RoomDirectory;
use crate::session::{ChatSession, SessionCallbacks, SessionContext};

pub struct ChatCore {
    config: ClientConfig,
    backend: Arc<dyn ChatBackend>,
    auth: AuthBridge,
    adapter: Arc<RealtimeAdapter>,
    aggregator: NotificationAggregator,
    rooms: Arc<Mutex<RoomDirectory>>,
    toasts: Arc<dyn ToastSink>,
    room_feed: Mutex<Option<Subscription>>,
}

impl ChatCore {
    /// Build the production stack: REST client, WebSocket transport (when
    /// an app key is configured) and the auth bridge over `stores`.
    pub fn from_config(
        config: ClientConfig,
        session: Option<Arc<dyn SessionProvider>>,
        stores: Vec<Arc<dyn TokenStore>>,
        toasts: Arc<dyn ToastSink>,
    ) -> Self {
        let backend: Arc<dyn ChatBackend> = Arc::new(ApiClient::new(&config.api_base_url));
        let transport = config
            .pusher
            .clone()
            .map(|pusher| Arc::new(PusherTransport::new(pusher)) as Arc<dyn Transport>);
        let auth = AuthBridge::new(backend.clone(), session, stores)
            .with_role_inference(config.infer_role_from_email);
        Self::from_parts(config, backend, transport, auth, toasts)
    }

    /// Assemble the core from already built collaborators.
    pub fn from_parts(
        config: ClientConfig,
        backend: Arc<dyn ChatBackend>,
        transport: Option<Arc<dyn Transport>>,
        auth: AuthBridge,
        toasts: Arc<dyn ToastSink>,
    ) -> Self {
        let identity: Arc<dyn IdentityProvider> = Arc::new(auth.clone());
        let adapter = Arc::new(RealtimeAdapter::new(
            transport,
            backend.clone(),
            identity.clone(),
        ));
        let aggregator = NotificationAggregator::new(backend.clone(), identity, toasts.clone());

        Self {
            config,
            backend,
            auth,
            adapter,
            aggregator,
            rooms: Arc::new(Mutex::new(RoomDirectory::new())),
            toasts,
            room_feed: Mutex::new(None),
        }
    }

    /// Start background work, resolve the actor, connect and load the room
    /// list. Returns the actor, or `None` when nobody is signed in (the
    /// aggregator still runs and picks up a later sign-in).
    pub async fn start(&self) -> Option<ActorIdentity> {
        self.aggregator.start(
            &self.adapter,
            self.config.unread_poll_interval,
            self.auth.subscribe(),
        );

        {
            let mut feed = self.room_feed.lock().unwrap_or_else(PoisonError::into_inner);
            if feed.is_none() {
                let rooms = Arc::downgrade(&self.rooms);
                *feed = Some(self.adapter.on_notification(handler(
                    move |notification: &ChatNotification| {
                        if let Some(rooms) = rooms.upgrade() {
                            rooms
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .apply_notification(notification);
                        }
                    },
                )));
            }
        }

        let Some(actor) = self.auth.current_actor().await else {
            info!("Chat core started without a signed-in actor");
            return None;
        };

        if !self.adapter.connect(actor.id, actor.role).await {
            info!(actor = %actor.id, "Chat core running without realtime");
        }
        if let Err(e) = self.load_rooms().await {
            warn!(error = %e, "Initial room list load failed");
        }
        info!(actor = %actor.id, role = %actor.role, "Chat core started");
        Some(actor)
    }

    /// Reload the conversation list from the backend.
    pub async fn load_rooms(&self) -> Result<usize> {
        let actor = self
            .auth
            .current_actor()
            .await
            .ok_or(ChatError::NotAuthenticated)?;
        let rooms = self.backend.list_chats(&actor.token).await?;
        let mut directory = self.lock_rooms();
        directory.replace_all(rooms);
        Ok(directory.rooms().len())
    }

    /// Mount a chat session for a conversation view.
    pub async fn open_session(
        &self,
        conversation: Option<ConversationId>,
        callbacks: SessionCallbacks,
    ) -> ChatSession {
        let role = self
            .auth
            .current_actor()
            .await
            .map_or(ActorRole::Pilgrim, |actor| actor.role);
        ChatSession::mount(self.session_context(), conversation, role, callbacks).await
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            adapter: self.adapter.clone(),
            backend: self.backend.clone(),
            identity: Arc::new(self.auth.clone()),
            aggregator: self.aggregator.clone(),
            rooms: self.rooms.clone(),
            toasts: self.toasts.clone(),
            liveness_interval: self.config.liveness_interval,
        }
    }

    /// Close the connection and wipe every credential.
    pub async fn sign_out(&self) {
        self.adapter.disconnect().await;
        self.auth.clear_auth_data().await;
        self.lock_rooms().replace_all(Vec::new());
        self.aggregator.reset();
    }

    /// Stop background work and close the connection (page unload).
    pub async fn shutdown(&self) {
        self.aggregator.stop();
        self.room_feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.adapter.disconnect().await;
        info!("Chat core shut down");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthBridge {
        &self.auth
    }

    pub fn adapter(&self) -> &Arc<RealtimeAdapter> {
        &self.adapter
    }

    pub fn notifications(&self) -> &NotificationAggregator {
        &self.aggregator
    }

    /// Non-archived rooms, most recent activity first.
    pub fn rooms(&self) -> Vec<ChatRoom> {
        self.lock_rooms().rooms()
    }

    pub fn total_unread_messages(&self) -> u32 {
        self.lock_rooms().total_unread()
    }

    fn lock_rooms(&self) -> MutexGuard<'_, RoomDirectory> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::events::MemoryToasts;
    use std::collections::BTreeSet;
    use umrah_net::testing::FakeBackend;
    use umrah_net::{MemoryHub, MemoryTransport, UserProfile};
    use umrah_shared::models::RoomKind;
    use umrah_shared::types::{ActorId, ConnectionState};

    fn room(id: u64) -> ChatRoom {
        ChatRoom {
            id: ConversationId(id),
            kind: RoomKind::Private,
            participants: BTreeSet::new(),
            last_message: None,
            unread_count: 0,
            is_archived: false,
            is_active: true,
        }
    }

    fn core(realtime: bool) -> (ChatCore, FakeBackend, MemoryHub) {
        let backend = FakeBackend::new();
        backend.add_profile(
            "opaque-token",
            UserProfile {
                id: ActorId(5),
                name: Some("Fatima".into()),
                email: Some("fatima@example.com".into()),
                role: Some("office".into()),
                roles: Vec::new(),
            },
        );
        backend.set_rooms(vec![room(42), room(43)]);
        backend.set_unread(3);

        let (transport, hub) = MemoryTransport::new();
        let transport = realtime.then(|| Arc::new(transport) as Arc<dyn Transport>);
        let auth = AuthBridge::new(
            Arc::new(backend.clone()),
            None,
            vec![Arc::new(MemoryTokenStore::new(Some("opaque-token")))],
        );
        let core = ChatCore::from_parts(
            ClientConfig::default(),
            Arc::new(backend.clone()),
            transport,
            auth,
            Arc::new(MemoryToasts::default()),
        );
        (core, backend, hub)
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
    async fn test_start_connects_and_loads_rooms() {
        let (core, backend, hub) = core(true);
        let actor = core.start().await.unwrap();
        assert_eq!(actor.id, ActorId(5));
        assert_eq!(actor.role, ActorRole::Office);
        assert_eq!(core.adapter().state(), ConnectionState::Connected);
        assert_eq!(core.rooms().len(), 2);
        settle_until(|| core.notifications().unread_count() == 3).await;
        settle_until(|| hub.subscriptions().len() == 2).await;
        assert_eq!(backend.count("presence:online"), 1);

        core.shutdown().await;
        assert_eq!(core.adapter().state(), ConnectionState::Disconnected);
        assert_eq!(backend.count("presence:offline"), 1);
    }

    #[tokio::test]
    async fn test_notifications_bump_room_counters() {
        let (core, _backend, hub) = core(true);
        core.start().await.unwrap();
        settle_until(|| hub.subscriptions().len() == 2).await;

        let data = r#"{"id":"n1","chat_id":43,"sender_id":9,"sender_name":"Omar","message":"Salam"}"#;
        assert!(hub.publish("private-notifications.5", "new-notification", data).await);
        settle_until(|| core.total_unread_messages() == 1).await;
        settle_until(|| core.notifications().notifications().len() == 1).await;
    }

    #[tokio::test]
    async fn test_runs_without_realtime() {
        let (core, backend, _hub) = core(false);
        assert!(core.start().await.is_some());
        assert!(!core.adapter().is_enabled());
        assert_eq!(core.adapter().state(), ConnectionState::Disconnected);
        assert_eq!(core.rooms().len(), 2);
        assert_eq!(backend.count("presence"), 0);
    }

    #[tokio::test]
    async fn test_sign_out_wipes_state() {
        let (core, _backend, _hub) = core(true);
        core.start().await.unwrap();
        settle_until(|| core.notifications().unread_count() == 3).await;
        let session = core.open_session(Some(ConversationId(42)), SessionCallbacks::default()).await;
        assert_eq!(session.conversation(), Some(ConversationId(42)));

        core.sign_out().await;
        assert_eq!(*core.notifications().watch_unread().borrow(), 0);
        settle_until(|| core.notifications().unread_count() == 0).await;
        assert!(core.auth().current_actor().await.is_none());
        assert!(core.rooms().is_empty());
        assert_eq!(core.adapter().state(), ConnectionState::Disconnected);
    }
}
