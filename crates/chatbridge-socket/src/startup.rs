//! Replication startup helpers for embedding in a node.
//!
//! [`spawn_server`] and [`spawn_client`] launch the transport on background
//! Tokio tasks so the node binary can run it alongside its instances.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chatbridge_socket::startup::spawn_server;
//! use chatbridge_socket::server::ServerConfig;
//!
//! let handle = spawn_server(&ServerConfig::default(), bus, "secret").await?;
//! // Peers can connect now. Shut down with `handle.shutdown()`.
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use chatbridge_core::{Bus, InstanceBook};
use chatbridge_types::SocketId;
use tokio::task::JoinHandle;

use crate::client::{ClientConfig, ReplicationClient};
use crate::error::ServerError;
use crate::registry::RemoteSession;
use crate::server::{ServerConfig, bind, serve};
use crate::state::ServerState;

/// A replication server running on a background task.
#[derive(Debug)]
pub struct ServerHandle {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the server is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ids of the connected peers.
    pub fn connected(&self) -> Vec<SocketId> {
        self.state.connected()
    }

    /// Live sessions with their claimed identities.
    pub fn sessions(&self) -> Vec<RemoteSession> {
        self.state.sessions()
    }

    /// Close a peer's connection. Returns `false` if no such peer.
    pub fn disconnect(&self, socket_id: SocketId) -> bool {
        self.state.disconnect(socket_id)
    }

    /// Stop replicating: close every peer, detach from the bus, and abort
    /// the accept task.
    pub fn shutdown(self) {
        let closed = self.state.close_all();
        self.task.abort();
        tracing::info!(
            local_addr = %self.local_addr,
            peers = closed,
            "replication server shut down"
        );
    }
}

/// Bind the server eagerly and serve peers on a background task.
///
/// Binding happens before this returns, so a port conflict surfaces here
/// rather than in the background task. Port `0` binds a free port; read it
/// back with [`ServerHandle::local_addr`].
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken.
pub async fn spawn_server(
    config: &ServerConfig,
    bus: Arc<Bus>,
    key: impl Into<String>,
) -> Result<ServerHandle, ServerError> {
    let listener = bind(config).await?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;
    let state = ServerState::new(bus, key);

    let task = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = serve(listener, state).await {
                tracing::error!(error = %e, "replication server exited with error");
            }
        })
    };

    tracing::info!(%local_addr, "replication server spawned on background task");

    Ok(ServerHandle {
        state,
        local_addr,
        task,
    })
}

/// Start a replication client on a background task.
///
/// The task reconnects forever; abort the returned handle to stop it.
pub fn spawn_client(
    config: ClientConfig,
    bus: Arc<Bus>,
    instances: Arc<InstanceBook>,
) -> (Arc<ReplicationClient>, JoinHandle<()>) {
    let uri = config.uri.clone();
    let client = ReplicationClient::new(config, bus, instances);
    let task = tokio::spawn(Arc::clone(&client).run());
    tracing::info!(%uri, "replication client spawned on background task");
    (client, task)
}
