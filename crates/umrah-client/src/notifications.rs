//! Notification aggregator.
//!
//! Process-wide unread state, independent of which conversation (if any)
//! is open. It listens to the adapter's notification stream, keeps the
//! notification list most-recent-first and mirrors the backend's unread
//! count. The mirror only moves on a confirmed backend response, on an
//! incoming unread notification or on losing the identity (back to zero),
//! and never below zero.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use umrah_net::{handler, ChatBackend, IdentityProvider, RealtimeAdapter, Subscription};
use umrah_shared::constants::GENERIC_NOTIFICATION_TITLE;
use umrah_shared::models::ChatNotification;
use umrah_shared::types::{ConversationId, NotificationId};

use crate::auth::AuthSignal;
use crate::events::{Toast, ToastAction, ToastKind, ToastSink};

#[derive(Default)]
struct AggState {
    notifications: Vec<ChatNotification>,
    unread: u32,
    active: Option<ConversationId>,
}

#[derive(Default)]
struct Lifecycle {
    subscription: Option<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn ChatBackend>,
    identity: Arc<dyn IdentityProvider>,
    toasts: Arc<dyn ToastSink>,
    state: Mutex<AggState>,
    unread_tx: watch::Sender<u32>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Clone)]
pub struct NotificationAggregator {
    inner: Arc<Inner>,
}

impl NotificationAggregator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
        toasts: Arc<dyn ToastSink>,
    ) -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                backend,
                identity,
                toasts,
                state: Mutex::new(AggState::default()),
                unread_tx,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Register with the adapter and start the fallback poll. The first
    /// poll runs immediately; auth signals trigger an extra one.
    pub fn start(
        &self,
        adapter: &RealtimeAdapter,
        poll_interval: Duration,
        signals: broadcast::Receiver<AuthSignal>,
    ) {
        let mut lifecycle = self.inner.lifecycle();
        if lifecycle.subscription.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        lifecycle.subscription = Some(adapter.on_notification(handler(
            move |notification: &ChatNotification| {
                if let Some(inner) = weak.upgrade() {
                    inner.ingest(notification.clone());
                }
            },
        )));

        let weak = Arc::downgrade(&self.inner);
        lifecycle
            .tasks
            .push(tokio::spawn(poll(weak, poll_interval, signals)));
        info!(interval_secs = poll_interval.as_secs(), "Notification aggregator started");
    }

    /// Deregister and stop polling.
    pub fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle();
        lifecycle.subscription = None;
        for task in lifecycle.tasks.drain(..) {
            task.abort();
        }
    }

    /// Add a notification received outside the adapter (e.g. forwarded
    /// from a push message while in the foreground).
    pub fn ingest(&self, notification: ChatNotification) {
        self.inner.ingest(notification);
    }

    /// Fetch the authoritative unread count. Never fails: on error the
    /// previous count is kept and `None` returned. Without an identity the
    /// mirror drops to zero.
    pub async fn refresh_unread_count(&self) -> Option<u32> {
        self.inner.refresh().await
    }

    /// Mark everything read on the backend; local state follows only a
    /// confirmed success.
    pub async fn mark_all_as_read(&self) -> bool {
        let inner = &self.inner;
        let Some(actor) = inner.identity.current_actor().await else {
            inner.toasts.show(Toast::error("Sign in to manage notifications"));
            return false;
        };

        match inner.backend.mark_all_notifications_read(&actor.token).await {
            Ok(true) => {
                {
                    let mut state = inner.lock();
                    state.unread = 0;
                    for notification in &mut state.notifications {
                        notification.is_read = true;
                    }
                }
                inner.publish_unread();
                inner.toasts.show(Toast::success("All notifications marked as read"));
                true
            }
            Ok(false) => {
                inner.toasts.show(Toast::error("Could not mark notifications as read"));
                false
            }
            Err(e) => {
                warn!(error = %e, "Mark all as read failed");
                inner.toasts.show(Toast::error("Could not mark notifications as read"));
                false
            }
        }
    }

    /// Mark one notification read. A notification already read locally
    /// is a no-op; the count drops by one only if it was unread.
    pub async fn mark_as_read(&self, id: &NotificationId) -> bool {
        let inner = &self.inner;
        let was_unread = match inner.lock().find(id).map(|n| !n.is_read) {
            Some(false) => return true,
            Some(true) => true,
            None => false,
        };

        let Some(actor) = inner.identity.current_actor().await else {
            inner.toasts.show(Toast::error("Sign in to manage notifications"));
            return false;
        };

        match inner.backend.mark_notification_read(&actor.token, id).await {
            Ok(true) => {
                let changed = {
                    let mut state = inner.lock();
                    let flipped = match state.find_mut(id) {
                        Some(notification) if !notification.is_read => {
                            notification.is_read = true;
                            true
                        }
                        _ => false,
                    };
                    if was_unread && flipped {
                        state.unread = state.unread.saturating_sub(1);
                    }
                    was_unread && flipped
                };
                if changed {
                    inner.publish_unread();
                }
                true
            }
            Ok(false) => {
                inner.toasts.show(Toast::error("Could not mark notification as read"));
                false
            }
            Err(e) => {
                warn!(notification = %id, error = %e, "Mark as read failed");
                inner.toasts.show(Toast::error("Could not mark notification as read"));
                false
            }
        }
    }

    /// Delete one notification. The count drops by one only if it was
    /// unread.
    pub async fn clear_notification(&self, id: &NotificationId) -> bool {
        let inner = &self.inner;
        let Some(actor) = inner.identity.current_actor().await else {
            inner.toasts.show(Toast::error("Sign in to manage notifications"));
            return false;
        };

        match inner.backend.delete_notification(&actor.token, id).await {
            Ok(true) => {
                let changed = {
                    let mut state = inner.lock();
                    let removed = state
                        .notifications
                        .iter()
                        .position(|n| &n.id == id)
                        .map(|pos| state.notifications.remove(pos));
                    match removed {
                        Some(notification) if !notification.is_read => {
                            state.unread = state.unread.saturating_sub(1);
                            true
                        }
                        _ => false,
                    }
                };
                if changed {
                    inner.publish_unread();
                }
                true
            }
            Ok(false) => {
                inner.toasts.show(Toast::error("Could not delete notification"));
                false
            }
            Err(e) => {
                warn!(notification = %id, error = %e, "Delete notification failed");
                inner.toasts.show(Toast::error("Could not delete notification"));
                false
            }
        }
    }

    /// Drop every notification from the local list. The unread mirror is
    /// left to the backend's next answer.
    pub fn clear_all(&self) -> usize {
        let mut state = self.inner.lock();
        let removed = state.notifications.len();
        state.notifications.clear();
        removed
    }

    /// Forget everything tied to the signed-out user, including the
    /// unread mirror.
    pub fn reset(&self) {
        {
            let mut state = self.inner.lock();
            state.notifications.clear();
            state.unread = 0;
        }
        self.inner.publish_unread();
    }

    /// Conversation currently on screen; its notifications raise no toast.
    pub fn set_active_conversation(&self, id: Option<ConversationId>) {
        self.inner.lock().active = id;
    }

    pub fn notifications(&self) -> Vec<ChatNotification> {
        self.inner.lock().notifications.clone()
    }

    pub fn unread_count(&self) -> u32 {
        self.inner.lock().unread
    }

    pub fn watch_unread(&self) -> watch::Receiver<u32> {
        self.inner.unread_tx.subscribe()
    }
}

impl AggState {
    fn find(&self, id: &NotificationId) -> Option<&ChatNotification> {
        self.notifications.iter().find(|n| &n.id == id)
    }

    fn find_mut(&mut self, id: &NotificationId) -> Option<&mut ChatNotification> {
        self.notifications.iter_mut().find(|n| &n.id == id)
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, AggState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_unread(&self) {
        let unread = self.lock().unread;
        self.unread_tx.send_replace(unread);
    }

    fn ingest(&self, notification: ChatNotification) {
        let toast = {
            let mut state = self.lock();
            if state.find(&notification.id).is_some() {
                debug!(notification = %notification.id, "Duplicate notification ignored");
                return;
            }
            if !notification.is_read {
                state.unread = state.unread.saturating_add(1);
            }
            let toast = (state.active != Some(notification.conversation_id)).then(|| Toast {
                kind: ToastKind::Info,
                title: if notification.sender_display_name.is_empty() {
                    GENERIC_NOTIFICATION_TITLE.to_string()
                } else {
                    notification.sender_display_name.clone()
                },
                message: notification.message_preview.clone(),
                action: Some(ToastAction::OpenConversation {
                    conversation_id: notification.conversation_id,
                }),
            });
            debug!(
                notification = %notification.id,
                conversation = %notification.conversation_id,
                "Notification received"
            );
            state.notifications.insert(0, notification);
            toast
        };
        self.publish_unread();
        if let Some(toast) = toast {
            self.toasts.show(toast);
        }
    }

    async fn refresh(&self) -> Option<u32> {
        let Some(actor) = self.identity.current_actor().await else {
            debug!("Not authenticated, clearing unread count");
            self.lock().unread = 0;
            self.publish_unread();
            return Some(0);
        };
        match self.backend.unread_count(&actor.token).await {
            Ok(count) => {
                self.lock().unread = count;
                self.publish_unread();
                Some(count)
            }
            Err(e) => {
                warn!(error = %e, "Unread count refresh failed");
                None
            }
        }
    }
}

async fn poll(
    inner: Weak<Inner>,
    interval: Duration,
    mut signals: broadcast::Receiver<AuthSignal>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signals_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            signal = signals.recv(), if signals_open => match signal {
                Ok(signal) => debug!(signal = ?signal, "Auth changed, refreshing unread count"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    signals_open = false;
                    continue;
                }
            },
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.refresh().await;
    }
}
