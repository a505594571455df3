//! Error types for the replication transport.
//!
//! [`HandshakeError`] converts into the HTTP response that refuses an
//! upgrade, via its [`IntoResponse`](axum::response::IntoResponse)
//! implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatbridge_types::PacketError;

/// Reasons an upgrade request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// The `Authentication` header is missing or does not match the secret.
    #[error("authentication failed")]
    Unauthorized,

    /// The `Instances` header is missing or not a JSON identity list.
    #[error("malformed Instances header: {0}")]
    MalformedInstances(String),

    /// The `SocketId` header is missing or not a valid id.
    #[error("malformed SocketId header: {0}")]
    MalformedSocketId(String),

    /// A claimed identity is held by another live session.
    #[error("instance {identity} is already connected")]
    IdentityConflict {
        /// The contested identity, as `type:name`.
        identity: String,
    },
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MalformedInstances(_)
            | Self::MalformedSocketId(_)
            | Self::IdentityConflict { .. } => StatusCode::CONFLICT,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// A frame received from a peer that cannot be accepted.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame could not be decoded.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// A peer sent the server-only `connection-info` packet.
    #[error("unexpected connection-info packet from peer")]
    UnexpectedConnectionInfo,

    /// A peer sent an event that must never leave its process.
    #[error("internal event from {identity} received over the wire")]
    InternalEvent {
        /// Identity of the originating instance, as `type:name`.
        identity: String,
    },
}

impl ProtocolError {
    /// Whether the connection should be closed. Undecodable frames are
    /// dropped; a peer that leaks internal traffic is disconnected.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedConnectionInfo | Self::InternalEvent { .. }
        )
    }
}

/// Errors that can occur when starting or running the replication server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Errors ending a single client connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting or talking to the server failed.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// A handshake header could not be built.
    #[error("invalid header value: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    /// The identity list could not be serialized.
    #[error("failed to encode instances: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(source: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(source))
    }
}
