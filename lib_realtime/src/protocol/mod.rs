//! # Wire Protocol
//!
//! Every frame on the connection is a JSON object of the shape
//! `{ "type": string, "data": any, "timestamp": string, "channel"?: string }`.
//!
//! `type` is modelled as [`MessageKind`]: a closed set of reserved system kinds
//! plus an open `Topic` variant for everything else. Inbound frames are decoded
//! through [`Message::from_text`], which is the only place untrusted JSON is
//! turned into a [`Message`]; topic frames without a channel are rejected there.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::utils::now_iso8601;

/// The `type` field of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client heartbeat.
    Ping,
    /// Server heartbeat reply.
    Pong,
    /// Request to join a channel.
    Subscribe,
    /// Request to leave a channel.
    Unsubscribe,
    /// Application-level error reported by the server.
    Error,
    /// Server acknowledgement of a subscribe request.
    SubscribeAck,
    /// Any non-reserved type; these are topic payloads and carry a channel.
    Topic(String),
}

impl MessageKind {
    /// The wire spelling of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Subscribe => "subscribe",
            MessageKind::Unsubscribe => "unsubscribe",
            MessageKind::Error => "error",
            MessageKind::SubscribeAck => "subscribe-ack",
            MessageKind::Topic(name) => name.as_str(),
        }
    }

    /// System kinds may omit the channel; topic kinds must not.
    pub fn is_system(&self) -> bool {
        !matches!(self, MessageKind::Topic(_))
    }
}

impl From<&str> for MessageKind {
    fn from(value: &str) -> Self {
        match value {
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "subscribe" => MessageKind::Subscribe,
            "unsubscribe" => MessageKind::Unsubscribe,
            "error" => MessageKind::Error,
            "subscribe-ack" => MessageKind::SubscribeAck,
            other => MessageKind::Topic(other.to_string()),
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match MessageKind::from(value.as_str()) {
            MessageKind::Topic(_) => MessageKind::Topic(value),
            reserved => reserved,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(MessageKind::from)
    }
}

/// A validated frame, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Frame type.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Arbitrary payload.
    pub data: Value,
    /// ISO-8601 timestamp. Outbound frames are stamped at send time; inbound
    /// frames without one are stamped on receipt.
    pub timestamp: String,
    /// Topic the frame belongs to. System frames may omit it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Untrusted shape of an inbound frame, before validation.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

impl Message {
    /// Decodes and validates one inbound text frame.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        if raw.kind.trim().is_empty() {
            return Err(ProtocolError::EmptyType);
        }

        let kind = MessageKind::from(raw.kind);
        let channel = raw.channel.filter(|c| !c.is_empty());
        if !kind.is_system() && channel.is_none() {
            return Err(ProtocolError::MissingChannel {
                kind: kind.to_string(),
            });
        }

        Ok(Self {
            kind,
            data: raw.data,
            timestamp: raw.timestamp.unwrap_or_else(now_iso8601),
            channel,
        })
    }

    /// Encodes the frame for the wire.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A frame the caller wants to publish. The timestamp is added by the
/// connection manager at the moment the frame is written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Frame type.
    pub kind: MessageKind,
    /// Payload.
    pub data: Value,
    /// Optional topic.
    pub channel: Option<String>,
}

impl OutboundMessage {
    /// A frame of `kind` carrying `data`, without a channel.
    pub fn new(kind: impl Into<MessageKind>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            channel: None,
        }
    }

    /// Sets the topic the frame is published on.
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// `{type: "subscribe", data: {channel}}`
    pub fn subscribe(channel: &str) -> Self {
        Self::new(MessageKind::Subscribe, json!({ "channel": channel }))
    }

    /// `{type: "unsubscribe", data: {channel}}`
    pub fn unsubscribe(channel: &str) -> Self {
        Self::new(MessageKind::Unsubscribe, json!({ "channel": channel }))
    }

    /// `{type: "ping", data: {timestamp}}`
    pub fn ping(timestamp: &str) -> Self {
        Self::new(MessageKind::Ping, json!({ "timestamp": timestamp }))
    }

    /// Turns this into a wire [`Message`] stamped with `timestamp`.
    pub fn stamp(self, timestamp: String) -> Message {
        Message {
            kind: self.kind,
            data: self.data,
            timestamp,
            channel: self.channel,
        }
    }
}
