// Realtime transport and REST plumbing for the chat core.

pub mod adapter;
pub mod api;
pub mod backoff;
pub mod channels;
pub mod error;
pub mod memory;
pub mod pusher;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use adapter::{IdentityProvider, RealtimeAdapter};
pub use api::{ApiClient, ChatBackend, UserProfile};
pub use backoff::Backoff;
pub use channels::{ChannelInfo, ChannelTracker};
pub use error::{ApiError, TransportError};
pub use memory::{MemoryHub, MemoryTransport};
pub use pusher::{PusherConfig, PusherTransport};
pub use registry::{handler, Handler, HandlerRegistry, Subscription};
pub use transport::{ChannelAuthorizer, Transport, TransportCommand, TransportHandle, TransportNotification};
