//! Socket id allocation and the identities each live session claims.
//!
//! Ids are handed out from zero upward. A peer reconnecting with an id this
//! registry issued before gets the same id back; the session previously
//! holding it, if still open, is superseded. Any other previous id (never
//! issued, or `-1`) yields a fresh id.

use std::collections::BTreeMap;

use chatbridge_types::{InstanceIdentity, SocketId};
use tracing::debug;

use crate::error::HandshakeError;

/// The outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Id assigned to the new session.
    pub socket_id: SocketId,
    /// Distinguishes this session from earlier ones that held the same id.
    pub token: u64,
}

/// A live replication session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    /// The session's id.
    pub socket_id: SocketId,
    /// Identities the peer claimed in its handshake.
    pub instances: Vec<InstanceIdentity>,
    token: u64,
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: u32,
    next_token: u64,
    active: BTreeMap<SocketId, RemoteSession>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a peer claiming `instances`, optionally resuming `previous`.
    pub fn admit(
        &mut self,
        instances: Vec<InstanceIdentity>,
        previous: Option<SocketId>,
    ) -> Result<Admission, HandshakeError> {
        let resumed = previous.filter(|id| id.into_inner() < self.next_id);

        let contested = self
            .active
            .values()
            .filter(|session| Some(session.socket_id) != resumed)
            .flat_map(|session| session.instances.iter())
            .find(|held| instances.contains(held));
        if let Some(identity) = contested {
            return Err(HandshakeError::IdentityConflict {
                identity: identity.to_string(),
            });
        }

        let socket_id = resumed.unwrap_or_else(|| {
            let id = SocketId(self.next_id);
            self.next_id = self.next_id.saturating_add(1);
            id
        });
        let token = self.next_token;
        self.next_token = self.next_token.saturating_add(1);

        debug!(
            %socket_id,
            resumed = resumed.is_some(),
            instances = instances.len(),
            "replication session admitted"
        );
        self.active.insert(
            socket_id,
            RemoteSession {
                socket_id,
                instances,
                token,
            },
        );
        Ok(Admission { socket_id, token })
    }

    /// End a session. Does nothing if a newer session has since taken over
    /// the id.
    pub fn release(&mut self, admission: Admission) -> bool {
        let current = self
            .active
            .get(&admission.socket_id)
            .is_some_and(|session| session.token == admission.token);
        if current {
            self.active.remove(&admission.socket_id);
        }
        current
    }

    /// Snapshot of the live sessions, ordered by id.
    pub fn sessions(&self) -> Vec<RemoteSession> {
        self.active.values().cloned().collect()
    }
}
