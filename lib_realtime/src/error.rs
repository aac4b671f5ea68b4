use std::path::PathBuf;

use thiserror::Error;

/// Failures while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has an empty `type` field")]
    EmptyType,

    #[error("topic message of type `{kind}` carries no channel")]
    MissingChannel { kind: String },
}

/// Failures raised by a [`Connector`](crate::transport::Connector) or a live link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid endpoint URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection attempt failed: {0}")]
    Connect(String),

    #[error("failed to write frame: {0}")]
    Send(String),

    #[error("link failed: {0}")]
    Link(String),

    #[error("link is closed")]
    Closed,
}

impl TransportError {
    /// Returns `false` for failures that no amount of retrying will fix.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::InvalidUrl { .. })
    }
}

/// Failures while loading or validating a [`ClientConfig`](crate::ClientConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures surfaced by [`ChannelClient`](crate::ChannelClient) itself.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("the connection manager task has stopped")]
    Closed,
}

/// Failures while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log level `{0}`")]
    Level(String),

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("cannot create log directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global tracing subscriber is already installed: {0}")]
    Init(String),
}
