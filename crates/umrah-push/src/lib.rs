//! Background push delivery: renders OS notifications for push messages,
//! routes clicks to the right conversation and keeps the offline cache.

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod notification;
pub mod payload;
pub mod worker;

pub use cache::{AssetFetcher, FetchRequest, FetchResponse, HttpFetcher, OfflineCache, ResponseSource};
pub use clients::{focus_or_open, ClickOutcome, MemoryWindows, WindowHost, WindowInfo};
pub use config::WorkerConfig;
pub use error::PushError;
pub use notification::{MemorySurface, NotificationSurface};
pub use payload::{chat_url, parse_push, render, NotificationAction, RenderedNotification};
pub use worker::{spawn_worker, PushWorker, WorkerEvent, WorkerHandle, WorkerState};
