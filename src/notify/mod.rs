//! Notification delivery: render events, send them, fall back to files.

pub mod dispatcher;
pub mod fallback;
pub mod message;
pub mod transport;

pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
pub use fallback::{FallbackRecord, FallbackStore};
pub use message::{OutboundMessage, PriorityHeader};
pub use transport::{SmtpTransport, Transport};
