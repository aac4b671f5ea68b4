//! # lib_realtime
//!
//! A real-time event-channel client. One persistent WebSocket connection is
//! multiplexed into many logical topics ("channels"); the client reconnects
//! with exponential backoff, keeps the link alive with a heartbeat and fans
//! every inbound frame out to independent per-channel consumers.
//!
//! ## Layout
//!
//! - **`core`**: the connection manager task, its state machine, the channel
//!   registry, the dispatcher and the public [`ChannelClient`] handle.
//! - **`adapters`**: the per-channel [`ChannelFeed`] façade handed to UI
//!   consumers, backed by a bounded FIFO buffer.
//! - **`protocol`**: the JSON wire message and its parse-boundary validation.
//! - **`transport`**: the `Connector`/`Link` seam, with a tokio-tungstenite
//!   implementation (feature `ws`) and an in-memory one.
//! - **`configs`**: [`ClientConfig`] and its JSON loader.
//! - **`loggers`**: tracing subscriber setup (feature `loggers`).
//! - **`utils`**: small shared helpers.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Per-channel consumer façade and its bounded buffer.
pub mod adapters;
/// Client configuration and JSON loading.
pub mod configs;
/// Connection manager, registry, dispatcher and the public client handle.
pub mod core;
/// Error types shared across the crate.
pub mod error;
/// Tracing subscriber setup.
#[cfg(feature = "loggers")]
pub mod loggers;
/// Wire message model.
pub mod protocol;
/// Transport seam and its implementations.
pub mod transport;
/// General helpers.
pub mod utils;

// --- Public API Re-exports ---
pub use adapters::{ChannelBuffer, ChannelFeed};
pub use configs::ClientConfig;
pub use crate::core::{ChannelClient, ConnectionEvent, ConnectionState, Notification};
pub use error::{ClientError, ConfigError, LoggerError, ProtocolError, TransportError};
pub use protocol::{Message, MessageKind, OutboundMessage};
