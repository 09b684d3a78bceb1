//! Push worker event loop.
//!
//! The worker runs as its own task and shares no memory with the chat
//! core. Its host (the platform shim receiving push messages, clicks and
//! fetches) drives it through a [`WorkerHandle`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{AssetFetcher, FetchRequest, FetchResponse, InstallReport, OfflineCache};
use crate::clients::{focus_or_open, ClickOutcome, WindowHost};
use crate::config::WorkerConfig;
use crate::error::{PushError, Result};
use crate::notification::NotificationSurface;
use crate::payload::{parse_push, render, NotificationAction, RenderedNotification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Installed,
    Active,
}

/// Events delivered to the worker task.
#[derive(Debug)]
pub enum WorkerEvent {
    Install {
        reply: oneshot::Sender<InstallReport>,
    },
    Activate {
        reply: oneshot::Sender<Result<usize>>,
    },
    Push {
        data: Option<Vec<u8>>,
        reply: oneshot::Sender<RenderedNotification>,
    },
    NotificationClick {
        notification: RenderedNotification,
        /// Platform action id; empty for a click on the body.
        action: String,
        reply: oneshot::Sender<ClickOutcome>,
    },
    NotificationClose {
        tag: String,
    },
    Fetch {
        request: FetchRequest,
        reply: oneshot::Sender<Result<FetchResponse>>,
    },
}

pub struct PushWorker {
    config: WorkerConfig,
    state: WorkerState,
    cache: OfflineCache,
    fetcher: Arc<dyn AssetFetcher>,
    surface: Arc<dyn NotificationSurface>,
    windows: Arc<dyn WindowHost>,
}

impl PushWorker {
    pub fn new(
        config: WorkerConfig,
        cache: OfflineCache,
        fetcher: Arc<dyn AssetFetcher>,
        surface: Arc<dyn NotificationSurface>,
        windows: Arc<dyn WindowHost>,
    ) -> Self {
        Self {
            config,
            state: WorkerState::Installing,
            cache,
            fetcher,
            surface,
            windows,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Populate the offline cache. Partial failure still completes the
    /// install.
    pub async fn install(&mut self) -> InstallReport {
        self.state = WorkerState::Installing;
        let report = self.cache.install(self.fetcher.as_ref()).await;
        self.state = WorkerState::Installed;
        report
    }

    /// Purge old cache versions and start handling events. A purge failure
    /// is logged and does not prevent activation.
    pub fn activate(&mut self) -> Result<usize> {
        let purged = self.cache.activate();
        if let Err(e) = &purged {
            warn!(error = %e, "Cache purge failed during activation");
        }
        self.state = WorkerState::Active;
        info!(cache = %self.cache.cache_name(), "Push worker active");
        purged
    }

    /// Render and show the notification for a push message.
    pub fn push(&self, data: Option<&[u8]>) -> RenderedNotification {
        let notification = render(&parse_push(data), &self.config);
        debug!(
            tag = %notification.tag,
            url = %notification.url,
            "Showing push notification"
        );
        self.surface.show(notification.clone());
        notification
    }

    /// Handle a click on a notification or one of its actions.
    pub async fn click(&self, notification: &RenderedNotification, action: &str) -> ClickOutcome {
        self.surface.close(&notification.tag);
        match NotificationAction::from_id(action) {
            Some(NotificationAction::Close) => {
                debug!(tag = %notification.tag, "Notification dismissed");
                ClickOutcome::Dismissed
            }
            Some(NotificationAction::View) | None => {
                focus_or_open(self.windows.as_ref(), &notification.url).await
            }
        }
    }

    pub fn close(&self, tag: &str) {
        self.surface.close(tag);
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.cache.respond(request, self.fetcher.as_ref()).await
    }

    async fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Install { reply } => {
                let _ = reply.send(self.install().await);
            }
            WorkerEvent::Activate { reply } => {
                let _ = reply.send(self.activate());
            }
            WorkerEvent::Push { data, reply } => {
                let _ = reply.send(self.push(data.as_deref()));
            }
            WorkerEvent::NotificationClick {
                notification,
                action,
                reply,
            } => {
                let _ = reply.send(self.click(&notification, &action).await);
            }
            WorkerEvent::NotificationClose { tag } => self.close(&tag),
            WorkerEvent::Fetch { request, reply } => {
                let _ = reply.send(self.fetch(&request).await);
            }
        }
    }
}

/// Sender side of a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    events: mpsc::Sender<WorkerEvent>,
}

impl WorkerHandle {
    async fn request<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(event(reply))
            .await
            .map_err(|_| PushError::WorkerGone)?;
        response.await.map_err(|_| PushError::WorkerGone)
    }

    pub async fn install(&self) -> Result<InstallReport> {
        self.request(|reply| WorkerEvent::Install { reply }).await
    }

    pub async fn activate(&self) -> Result<usize> {
        self.request(|reply| WorkerEvent::Activate { reply }).await?
    }

    pub async fn push(&self, data: Option<Vec<u8>>) -> Result<RenderedNotification> {
        self.request(|reply| WorkerEvent::Push { data, reply }).await
    }

    pub async fn click(
        &self,
        notification: RenderedNotification,
        action: &str,
    ) -> Result<ClickOutcome> {
        let action = action.to_string();
        self.request(|reply| WorkerEvent::NotificationClick {
            notification,
            action,
            reply,
        })
        .await
    }

    pub async fn close(&self, tag: &str) -> Result<()> {
        self.events
            .send(WorkerEvent::NotificationClose {
                tag: tag.to_string(),
            })
            .await
            .map_err(|_| PushError::WorkerGone)
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.request(|reply| WorkerEvent::Fetch { request, reply })
            .await?
    }
}

/// Spawn the worker's event loop. The task ends when every handle is
/// dropped.
pub fn spawn_worker(mut worker: PushWorker) -> (WorkerHandle, JoinHandle<()>) {
    let (events, mut rx) = mpsc::channel::<WorkerEvent>(64);
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            worker.handle(event).await;
        }
        debug!("Push worker event loop ended");
    });
    (WorkerHandle { events }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::StubFetcher;
    use crate::cache::ResponseSource;
    use crate::clients::MemoryWindows;
    use crate::notification::MemorySurface;
    use umrah_store::Database;

    struct Fixture {
        handle: WorkerHandle,
        surface: MemorySurface,
        windows: MemoryWindows,
        fetcher: StubFetcher,
    }

    fn fixture() -> Fixture {
        let config = WorkerConfig::default();
        let surface = MemorySurface::default();
        let windows = MemoryWindows::default();
        let fetcher = StubFetcher::serving(&["/", "/offline", "/manifest.json"]);
        let cache = OfflineCache::new(Database::open_in_memory().unwrap(), &config);
        let worker = PushWorker::new(
            config,
            cache,
            Arc::new(fetcher.clone()),
            Arc::new(surface.clone()),
            Arc::new(windows.clone()),
        );
        let (handle, _task) = spawn_worker(worker);
        Fixture {
            handle,
            surface,
            windows,
            fetcher,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_push_and_click() {
        let f = fixture();
        let report = f.handle.install().await.unwrap();
        assert_eq!(report.failed.len(), 2);
        assert_eq!(f.handle.activate().await.unwrap(), 0);

        let data = br#"{"data":{"chat_id":"42","user_type":"office","locale":"ar"}}"#.to_vec();
        let first = f.handle.push(Some(data.clone())).await.unwrap();
        f.handle.push(Some(data)).await.unwrap();
        assert_eq!(f.surface.visible().len(), 1);
        assert_eq!(first.title, "رسالة جديدة");

        let outcome = f.handle.click(first, "").await.unwrap();
        assert!(matches!(outcome, ClickOutcome::Opened(_)));
        assert_eq!(f.windows.snapshot()[0].url, "/ar/office/chat?id=42");
        assert!(f.surface.visible().is_empty());
    }

    #[tokio::test]
    async fn test_view_focuses_existing_window_and_close_dismisses() {
        let f = fixture();
        let existing = f.windows.add("https://umrah.example/ar/office/chat?id=42");

        let data = br#"{"data":{"chat_id":"42","user_type":"office"}}"#.to_vec();
        let shown = f.handle.push(Some(data.clone())).await.unwrap();
        assert_eq!(
            f.handle.click(shown, "view").await.unwrap(),
            ClickOutcome::Focused(existing)
        );

        let shown = f.handle.push(Some(data)).await.unwrap();
        assert_eq!(
            f.handle.click(shown, "close").await.unwrap(),
            ClickOutcome::Dismissed
        );
        assert_eq!(f.windows.snapshot().len(), 1);
        assert!(f.surface.visible().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_through_handle() {
        let f = fixture();
        f.handle.install().await.unwrap();
        f.handle.activate().await.unwrap();
        f.fetcher.set_offline(true);

        let response = f
            .handle
            .fetch(FetchRequest {
                path: "/ar/user/chat".into(),
                navigation: true,
            })
            .await
            .unwrap();
        assert_eq!(response.source, ResponseSource::OfflineFallback);

        f.handle.close("default").await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_worker() {
        let (events, rx) = mpsc::channel(1);
        drop(rx);
        let handle = WorkerHandle { events };
        assert!(matches!(
            handle.push(None).await,
            Err(PushError::WorkerGone)
        ));
    }
}
