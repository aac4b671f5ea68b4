//! # Client Configuration
//!
//! [`ClientConfig`] carries every recognised option with camelCase JSON keys,
//! so the same document can be shared with non-Rust front ends. Partial
//! documents are layered over [`ClientConfig::default`].

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::transport::check_ws_url;

/// Endpoint used when none is configured.
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Connect as soon as the client is constructed.
    pub auto_connect: bool,
    /// Base reconnect delay in milliseconds.
    pub reconnect_interval: u64,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Milliseconds between heartbeat pings.
    pub heartbeat_interval: u64,
    /// Milliseconds of inbound silence tolerated before the link is treated
    /// as dead. Absent means pongs are not tracked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout: Option<u64>,
    /// Buffer size for channels without an explicit entry.
    pub default_buffer_capacity: usize,
    /// Per-channel buffer sizes.
    pub channel_capacities: HashMap<String, usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            auto_connect: true,
            reconnect_interval: 3000,
            max_reconnect_attempts: 5,
            heartbeat_interval: 30_000,
            pong_timeout: None,
            default_buffer_capacity: 100,
            channel_capacities: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parses a (possibly partial) JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Rejects values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ws_url(&self.url).map_err(|e| ConfigError::Invalid {
            field: "url",
            reason: e.to_string(),
        })?;
        if self.reconnect_interval == 0 {
            return Err(invalid("reconnectInterval", "must be greater than zero"));
        }
        if self.heartbeat_interval == 0 {
            return Err(invalid("heartbeatInterval", "must be greater than zero"));
        }
        if self.pong_timeout == Some(0) {
            return Err(invalid("pongTimeout", "must be greater than zero"));
        }
        if self.default_buffer_capacity == 0 {
            return Err(invalid("defaultBufferCapacity", "must be at least 1"));
        }
        if let Some((channel, _)) = self.channel_capacities.iter().find(|(_, cap)| **cap == 0) {
            return Err(invalid(
                "channelCapacities",
                &format!("capacity for `{channel}` must be at least 1"),
            ));
        }
        Ok(())
    }

    /// Buffer capacity for `channel`.
    pub fn capacity_for(&self, channel: &str) -> usize {
        self.channel_capacities
            .get(channel)
            .copied()
            .unwrap_or(self.default_buffer_capacity)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn pong_deadline(&self) -> Option<Duration> {
        self.pong_timeout.map(Duration::from_millis)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
