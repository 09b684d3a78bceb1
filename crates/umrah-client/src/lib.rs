pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod notifications;
pub mod rooms;
pub mod service;
pub mod session;
pub mod timeline;
pub mod token;

use tracing_subscriber::{fmt, EnvFilter};

pub use crate::auth::{AuthBridge, AuthSignal, MemoryTokenStore, SessionProvider, SessionUser, TokenStore};
pub use crate::config::ClientConfig;
pub use crate::service::ChatCore;
pub use crate::error::{AuthError, ChatError};
pub use crate::events::{LogToasts, MemoryToasts, Toast, ToastAction, ToastKind, ToastSink};
pub use crate::notifications::NotificationAggregator;
pub use crate::rooms::RoomDirectory;
pub use crate::session::{ChatSession, SessionCallbacks, SessionContext, TypingUser};
pub use crate::timeline::MessageTimeline;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Call once from the embedding application.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("umrah_client=debug,umrah_net=debug,umrah_push=info,umrah_store=info,warn")
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Umrah chat core logging initialised");
    }
}
