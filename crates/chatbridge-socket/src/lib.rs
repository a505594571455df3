//! WebSocket replication transport for chatbridge nodes.
//!
//! Nodes form a star: one node runs the [`server`], every other node runs a
//! [`client`]. Each side installs a wildcard handler on its local bus and
//! forwards every locally originated, non-internal event to the link.
//! Frames arriving from the link are decoded as remote events, republished
//! on the local bus and, on the server, relayed verbatim to the other
//! peers. A remote event is never forwarded by the wildcard handler, which
//! is what keeps the star free of loops.
//!
//! # Modules
//!
//! - [`handshake`] -- Upgrade headers and their validation
//! - [`registry`] -- Socket id allocation and claimed identities
//! - [`state`] -- Server peer table, forwarding and relay
//! - [`ws`] -- Per-peer `WebSocket` lifecycle
//! - [`router`] -- Axum router
//! - [`server`] -- Listener lifecycle
//! - [`client`] -- Reconnecting replication client
//! - [`startup`] -- Background-task helpers used by the node binary
//! - [`error`] -- Error types

pub mod client;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use client::{ClientConfig, ConnectionState, ReplicationClient};
pub use error::{ClientError, HandshakeError, ProtocolError, ServerError};
pub use router::build_router;
pub use server::ServerConfig;
pub use startup::{ServerHandle, spawn_client, spawn_server};
pub use state::ServerState;
