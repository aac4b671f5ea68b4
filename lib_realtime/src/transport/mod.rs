//! # Transport Seam
//!
//! The connection manager never touches a socket directly. It asks a
//! [`Connector`] for a fresh [`Link`] on every (re)connection attempt and then
//! reads [`LinkEvent`]s from it until the link ends.
//!
//! - **`ws`**: tokio-tungstenite WebSocket client (feature `ws`).
//! - **`memory`**: an in-process peer, used by tests and demos.

use futures_util::future::BoxFuture;
use url::Url;

use crate::error::TransportError;

/// In-process transport.
pub mod memory;
/// WebSocket transport over tokio-tungstenite.
#[cfg(feature = "ws")]
pub mod ws;

/// WebSocket close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// How a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, if the peer sent one.
    pub code: Option<u16>,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseInfo {
    /// A close with the given code and reason.
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A normal closure (code 1000).
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(Some(NORMAL_CLOSURE), reason)
    }

    /// Only a normal closure counts as clean; anything else triggers reconnection.
    pub fn is_clean(&self) -> bool {
        self.code == Some(NORMAL_CLOSURE)
    }
}

/// Something that happened on a live link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A text frame arrived.
    Frame(String),
    /// The link closed. After this the link yields nothing more.
    Closed(CloseInfo),
    /// The link failed at the transport level and is no longer usable.
    Failed(TransportError),
}

/// One established connection.
///
/// `next_event` must be cancel-safe: the connection manager polls it inside a
/// `tokio::select!` and may drop the future when another branch wins.
pub trait Link: Send {
    /// Writes one text frame.
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Waits for the next event on the link.
    fn next_event(&mut self) -> BoxFuture<'_, LinkEvent>;

    /// Closes the link with a normal-closure status.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens links to an endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Starts a connection attempt. The returned future owns everything it
    /// needs, so the connection manager can keep polling it while handling
    /// commands, or drop it to abandon the attempt.
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Box<dyn Link>, TransportError>>;
}

/// Checks that `url` parses and uses a WebSocket scheme.
pub fn check_ws_url(url: &str) -> Result<Url, TransportError> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_normal_closure_is_clean() {
        assert!(CloseInfo::normal("bye").is_clean());
        assert!(!CloseInfo::new(Some(1001), "going away").is_clean());
        assert!(!CloseInfo::new(Some(1006), "abnormal").is_clean());
        assert!(!CloseInfo::new(None, "eof").is_clean());
    }

    #[test]
    fn accepts_websocket_schemes_only() {
        assert!(check_ws_url("ws://localhost:8000/ws").is_ok());
        assert!(check_ws_url("wss://example.org/stream").is_ok());

        let err = check_ws_url("http://localhost:8000").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
        assert!(!err.is_recoverable());

        assert!(check_ws_url("not a url").is_err());
    }
}
