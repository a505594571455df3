//! Text frames exchanged over a replication link.
//!
//! Two shapes share one envelope, `{"name": ..., "data": ...}`:
//!
//! - application packets, where `name` is a bus [`Channel`](crate::Channel)
//!   and `data` the event payload;
//! - the reserved [`CONNECTION_INFO`] packet a server sends exactly once,
//!   right after accepting a peer.

use serde::{Deserialize, Serialize};

use crate::enums::Channel;
use crate::events::BusEvent;
use crate::ids::SocketId;

/// Reserved packet name for [`SocketConnectionInfo`].
pub const CONNECTION_INFO: &str = "connection-info";

/// Errors raised while decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The frame is not valid JSON or does not match the payload schema.
    #[error("malformed packet: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame has no string `name` field.
    #[error("packet has no name")]
    MissingName,

    /// The `name` field is neither a channel nor a reserved packet name.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

/// Session details a server hands to a freshly accepted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketConnectionInfo {
    /// The id to present as `SocketId` on the next reconnect.
    pub socket_id: SocketId,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    name: &'a str,
    data: &'a T,
}

/// A decoded replication frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The reserved session-info packet.
    ConnectionInfo(SocketConnectionInfo),
    /// A replicated bus event. Always [`Origin::Remote`](crate::Origin::Remote)
    /// once decoded.
    Application(BusEvent),
}

impl Frame {
    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, PacketError> {
        let text = match self {
            Self::ConnectionInfo(info) => serde_json::to_string(&Envelope {
                name: CONNECTION_INFO,
                data: info,
            })?,
            Self::Application(event) => serde_json::to_string(event)?,
        };
        Ok(text)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        let name = value
            .get("name")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or(PacketError::MissingName)?;

        if name == CONNECTION_INFO {
            let data = value
                .get_mut("data")
                .map(serde_json::Value::take)
                .unwrap_or_default();
            return Ok(Self::ConnectionInfo(serde_json::from_value(data)?));
        }
        if Channel::from_name(&name).is_none() {
            return Err(PacketError::UnknownChannel(name));
        }
        Ok(Self::Application(serde_json::from_value(value)?))
    }
}

impl From<BusEvent> for Frame {
    fn from(event: BusEvent) -> Self {
        Self::Application(event)
    }
}
