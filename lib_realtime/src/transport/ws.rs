//! # WebSocket Transport
//!
//! [`WsConnector`] opens tokio-tungstenite client connections. Text frames are
//! passed through as-is; binary frames are accepted when they hold UTF-8 JSON.
//! WebSocket-level ping/pong control frames are answered by tungstenite itself
//! and never reach the connection manager.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::transport::{check_ws_url, CloseInfo, Connector, Link, LinkEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `ws://` and `wss://` endpoints.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Creates a connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Box<dyn Link>, TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            check_ws_url(&url)?;
            let (stream, response) = connect_async(url.as_str()).await.map_err(|e| match e {
                tungstenite::Error::Url(reason) => TransportError::InvalidUrl {
                    url: url.clone(),
                    reason: reason.to_string(),
                },
                other => TransportError::Connect(other.to_string()),
            })?;
            tracing::debug!(%url, status = %response.status(), "websocket handshake complete");
            Ok(Box::new(WsLink { stream }) as Box<dyn Link>)
        })
    }
}

struct WsLink {
    stream: WsStream,
}

impl Link for WsLink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream
                .send(WsMessage::Text(text.into()))
                .await
                .map_err(|e| TransportError::Send(e.to_string()))
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, LinkEvent> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => return LinkEvent::Frame(text.to_string()),
                    Some(Ok(WsMessage::Binary(bin))) => match String::from_utf8(bin.to_vec()) {
                        Ok(text) => return LinkEvent::Frame(text),
                        Err(_) => {
                            tracing::warn!(len = bin.len(), "dropping non-UTF-8 binary frame");
                        }
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        let info = match frame {
                            Some(frame) => {
                                CloseInfo::new(Some(u16::from(frame.code)), frame.reason.to_string())
                            }
                            None => CloseInfo::new(None, "closed without status"),
                        };
                        return LinkEvent::Closed(info);
                    }
                    // Control frames are handled by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return LinkEvent::Failed(TransportError::Link(e.to_string())),
                    None => return LinkEvent::Closed(CloseInfo::new(None, "stream ended")),
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            };
            if let Err(e) = self.stream.close(Some(frame)).await {
                tracing::debug!(error = %e, "websocket close handshake failed");
            }
        })
    }
}
