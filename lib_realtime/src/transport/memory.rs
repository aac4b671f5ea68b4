//! # In-Memory Transport
//!
//! A [`MemoryConnector`] hands every connection attempt to the paired
//! [`MemoryServer`], which decides whether to accept or refuse it. An accepted
//! attempt yields a [`MemoryPeer`]: the server side of the link, able to push
//! frames, close cleanly or uncleanly, and read what the client wrote.
//!
//! Nothing here touches the network, so connection-manager behaviour can be
//! driven step by step (typically under `tokio::time::pause`).

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;
use crate::protocol::{Message, MessageKind};
use crate::transport::{CloseInfo, Connector, Link, LinkEvent};

/// What the client wrote to a [`MemoryPeer`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerFrame {
    /// A text frame.
    Text(String),
    /// The client closed the link with a normal-closure status.
    Close,
}

/// Creates a connected connector/server pair.
pub fn pair() -> (MemoryConnector, MemoryServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryConnector { attempts: tx }, MemoryServer { attempts: rx })
}

/// Client half: pass it to [`ChannelClient::with_connector`](crate::ChannelClient::with_connector).
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    attempts: mpsc::UnboundedSender<PendingAttempt>,
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Box<dyn Link>, TransportError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let attempt = PendingAttempt {
            url: url.to_string(),
            reply: reply_tx,
        };
        let queued = self.attempts.send(attempt).is_ok();
        Box::pin(async move {
            if !queued {
                return Err(TransportError::Connect("memory server is gone".to_string()));
            }
            match reply_rx.await {
                Ok(Ok(link)) => Ok(Box::new(link) as Box<dyn Link>),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(TransportError::Connect("attempt dropped".to_string())),
            }
        })
    }
}

/// Server half: receives connection attempts.
#[derive(Debug)]
pub struct MemoryServer {
    attempts: mpsc::UnboundedReceiver<PendingAttempt>,
}

impl MemoryServer {
    /// Waits for the next connection attempt. Returns `None` once every
    /// connector clone is dropped.
    pub async fn next_attempt(&mut self) -> Option<PendingAttempt> {
        self.attempts.recv().await
    }

    /// Returns an attempt that is already queued, without waiting.
    pub fn try_next_attempt(&mut self) -> Option<PendingAttempt> {
        self.attempts.try_recv().ok()
    }
}

/// A connection attempt waiting for the server's decision.
#[derive(Debug)]
pub struct PendingAttempt {
    url: String,
    reply: oneshot::Sender<Result<MemoryLink, TransportError>>,
}

impl PendingAttempt {
    /// URL the client dialled.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Completes the handshake and returns the server side of the link.
    pub fn accept(self) -> MemoryPeer {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let link = MemoryLink {
            inbound,
            outbound,
            ended: false,
        };
        // A dropped receiver means the client abandoned the attempt; the peer
        // then simply sees a closed link.
        let _ = self.reply.send(Ok(link));
        MemoryPeer {
            to_client,
            from_client,
        }
    }

    /// Fails the attempt with a recoverable connect error.
    pub fn refuse(self, reason: &str) {
        let _ = self
            .reply
            .send(Err(TransportError::Connect(reason.to_string())));
    }

    /// Fails the attempt with an arbitrary transport error.
    pub fn fail(self, error: TransportError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Server side of an accepted in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<LinkEvent>,
    from_client: mpsc::UnboundedReceiver<PeerFrame>,
}

impl MemoryPeer {
    /// Pushes a raw text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(LinkEvent::Frame(text.into()));
    }

    /// Serializes `value` and pushes it to the client.
    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Closes the link with the given code.
    pub fn close(&self, code: Option<u16>, reason: &str) {
        let _ = self
            .to_client
            .send(LinkEvent::Closed(CloseInfo::new(code, reason)));
    }

    /// Closes with a normal-closure status.
    pub fn close_clean(&self) {
        let _ = self
            .to_client
            .send(LinkEvent::Closed(CloseInfo::normal("server shutdown")));
    }

    /// Closes with abnormal closure (1006), as a dropped network would.
    pub fn close_unclean(&self) {
        self.close(Some(1006), "connection lost");
    }

    /// Reports a transport failure on the link.
    pub fn fail(&self, error: TransportError) {
        let _ = self.to_client.send(LinkEvent::Failed(error));
    }

    /// Next frame the client wrote, or `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<PeerFrame> {
        self.from_client.recv().await
    }

    /// Next decoded message the client wrote, skipping heartbeat pings.
    /// Returns `None` on client close.
    pub async fn recv_message(&mut self) -> Option<Message> {
        loop {
            match self.recv().await? {
                PeerFrame::Text(text) => match Message::from_text(&text) {
                    Ok(msg) if msg.kind == MessageKind::Ping => continue,
                    Ok(msg) => return Some(msg),
                    Err(e) => {
                        tracing::warn!(error = %e, "client wrote an undecodable frame");
                        continue;
                    }
                },
                PeerFrame::Close => return None,
            }
        }
    }

    /// Every frame the client has written so far, without waiting.
    pub fn drain(&mut self) -> Vec<PeerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Client side of an accepted in-memory link.
#[derive(Debug)]
pub struct MemoryLink {
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
    outbound: mpsc::UnboundedSender<PeerFrame>,
    ended: bool,
}

impl Link for MemoryLink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.outbound
                .send(PeerFrame::Text(text))
                .map_err(|_| TransportError::Closed)
        })
    }

    fn next_event(&mut self) -> BoxFuture<'_, LinkEvent> {
        Box::pin(async move {
            if self.ended {
                return std::future::pending().await;
            }
            match self.inbound.recv().await {
                Some(event) => {
                    if !matches!(event, LinkEvent::Frame(_)) {
                        self.ended = true;
                    }
                    event
                }
                None => {
                    self.ended = true;
                    LinkEvent::Closed(CloseInfo::new(Some(1006), "peer dropped"))
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.outbound.send(PeerFrame::Close);
            self.ended = true;
        })
    }
}
