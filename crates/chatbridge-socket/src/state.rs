//! Shared state of a replication server.
//!
//! [`ServerState`] owns the session registry and the table of connected
//! peers. Each peer is represented by the sending half of an unbounded
//! channel drained by that peer's socket task, so broadcasting never waits
//! on a slow socket.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chatbridge_core::{Bus, HandlerError, SubscriptionId};
use chatbridge_types::{BusEvent, Frame, SocketId};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::{HandshakeError, ProtocolError};
use crate::handshake::Handshake;
use crate::registry::{Admission, RemoteSession, SessionRegistry};

/// Instruction for a peer's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send a text frame.
    Frame(String),
    /// Close the connection.
    Close,
}

struct Peer {
    token: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Replication server state shared by every peer task.
pub struct ServerState {
    bus: Arc<Bus>,
    key: String,
    sessions: Mutex<SessionRegistry>,
    peers: Mutex<BTreeMap<SocketId, Peer>>,
    forwarder: SubscriptionId,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServerState {
    /// Create the state and start forwarding local events from `bus`.
    pub fn new(bus: Arc<Bus>, key: impl Into<String>) -> Arc<Self> {
        let key = key.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = Weak::clone(weak);
            let forwarder = bus.subscribe_all(move |event| {
                if let Some(state) = weak.upgrade() {
                    state.forward_local(event);
                }
                Ok::<(), HandlerError>(())
            });
            Self {
                bus,
                key,
                sessions: Mutex::new(SessionRegistry::new()),
                peers: Mutex::new(BTreeMap::new()),
                forwarder,
                closed: AtomicBool::new(false),
            }
        })
    }

    /// The shared secret peers must present.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The local bus.
    pub const fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Register a handshake with the session registry.
    pub fn admit(&self, handshake: Handshake) -> Result<Admission, HandshakeError> {
        lock(&self.sessions).admit(handshake.instances, handshake.previous)
    }

    /// Release a session whose socket never became a peer.
    pub fn release(&self, admission: Admission) {
        lock(&self.sessions).release(admission);
    }

    /// Start delivering frames to a peer. A peer previously attached under
    /// the same id is told to close.
    /// Once the state is closed the new peer is told to close instead.
    pub fn attach(&self, admission: Admission, tx: mpsc::UnboundedSender<Outbound>) {
        let previous = {
            let mut peers = lock(&self.peers);
            if self.closed.load(Ordering::Acquire) {
                tx.send(Outbound::Close).ok();
                return;
            }
            peers.insert(
                admission.socket_id,
                Peer {
                    token: admission.token,
                    tx,
                },
            )
        };
        if let Some(previous) = previous {
            info!(socket_id = %admission.socket_id, "replication peer superseded by reconnect");
            previous.tx.send(Outbound::Close).ok();
        }
    }

    /// Forget a peer and end its session, unless a newer connection has
    /// taken over its id.
    pub fn detach(&self, admission: Admission) {
        {
            let mut peers = lock(&self.peers);
            let current = peers
                .get(&admission.socket_id)
                .is_some_and(|peer| peer.token == admission.token);
            if current {
                peers.remove(&admission.socket_id);
            }
        }
        self.release(admission);
    }

    /// Stop replicating: detach from the bus, tell every peer to close,
    /// and refuse peers attaching afterwards. Returns the number of peers
    /// told to close.
    pub fn close_all(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.bus.unsubscribe(self.forwarder);
        let peers = {
            let mut peers = lock(&self.peers);
            core::mem::take(&mut *peers)
        };
        let closed = peers
            .values()
            .filter(|peer| peer.tx.send(Outbound::Close).is_ok())
            .count();
        info!(peers = closed, "replication server closed");
        closed
    }

    /// Ids of the currently attached peers.
    pub fn connected(&self) -> Vec<SocketId> {
        lock(&self.peers).keys().copied().collect()
    }

    /// Live sessions with their claimed identities.
    pub fn sessions(&self) -> Vec<RemoteSession> {
        lock(&self.sessions).sessions()
    }

    /// Ask a peer's socket task to close. Returns `false` if no such peer.
    pub fn disconnect(&self, socket_id: SocketId) -> bool {
        lock(&self.peers)
            .get(&socket_id)
            .is_some_and(|peer| peer.tx.send(Outbound::Close).is_ok())
    }

    /// Send a text frame to every peer except `except`. Peers that went
    /// away in the meantime are skipped.
    pub fn broadcast(&self, text: &str, except: Option<SocketId>) -> usize {
        let targets: Vec<mpsc::UnboundedSender<Outbound>> = lock(&self.peers)
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .map(|(_, peer)| peer.tx.clone())
            .collect();

        targets
            .iter()
            .filter(|tx| tx.send(Outbound::Frame(text.to_owned())).is_ok())
            .count()
    }

    /// Forward a local bus event to every peer. Remote and internal events
    /// are not forwarded.
    pub fn forward_local(&self, event: &BusEvent) {
        if !event.is_replicable() {
            return;
        }
        match Frame::Application(event.clone()).encode() {
            Ok(text) => {
                let delivered = self.broadcast(&text, None);
                trace!(channel = %event.channel(), delivered, "forwarded local event");
            }
            Err(error) => {
                warn!(channel = %event.channel(), %error, "failed to encode local event");
            }
        }
    }

    /// Handle a text frame from peer `from`: republish it locally as a
    /// remote event, then relay it verbatim to every other peer.
    pub fn receive(&self, from: SocketId, text: &str) -> Result<(), ProtocolError> {
        let event = match Frame::decode(text)? {
            Frame::Application(event) => event,
            Frame::ConnectionInfo(_) => return Err(ProtocolError::UnexpectedConnectionInfo),
        };
        if event.is_internal() {
            return Err(ProtocolError::InternalEvent {
                identity: event.meta().identity().to_string(),
            });
        }

        if let Err(error) = self.bus.publish(&event) {
            warn!(socket_id = %from, %error, "republishing remote event failed");
        }
        let relayed = self.broadcast(text, Some(from));
        debug!(
            socket_id = %from,
            channel = %event.channel(),
            relayed,
            "remote event received"
        );
        Ok(())
    }
}

impl Drop for ServerState {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.bus.unsubscribe(self.forwarder);
        }
    }
}

impl core::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerState")
            .field("peers", &self.connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chatbridge_core::InstanceHandle;
    use chatbridge_types::{Channel, InstanceIdentity, InstanceType, MinecraftChatEvent};

    use super::*;

    fn chat(handle: &InstanceHandle, message: &str) -> BusEvent {
        BusEvent::from(MinecraftChatEvent {
            meta: handle.event_meta(),
            message: message.to_owned(),
        })
    }

    fn peer(
        state: &ServerState,
        name: &str,
    ) -> (Admission, mpsc::UnboundedReceiver<Outbound>) {
        let admission = state
            .admit(Handshake {
                instances: vec![InstanceIdentity::new(name, InstanceType::Minecraft)],
                previous: None,
            })
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        state.attach(admission, tx);
        (admission, rx)
    }

    #[test]
    fn local_events_reach_every_peer() {
        let bus = Arc::new(Bus::new());
        let state = ServerState::new(Arc::clone(&bus), "S1");
        let (_, mut a) = peer(&state, "guild-a");
        let (_, mut b) = peer(&state, "guild-b");

        let local = InstanceHandle::new(InstanceIdentity::new("hub", InstanceType::Discord));
        bus.publish(&chat(&local, "hello")).unwrap();

        assert!(matches!(a.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(b.try_recv(), Ok(Outbound::Frame(_))));
    }

    #[test]
    fn internal_local_events_stay_home() {
        let bus = Arc::new(Bus::new());
        let state = ServerState::new(Arc::clone(&bus), "S1");
        let (_, mut a) = peer(&state, "guild-a");

        let main = InstanceHandle::new(InstanceIdentity::new("node", InstanceType::Main));
        bus.publish(&chat(&main, "private")).unwrap();
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn remote_frames_are_republished_and_relayed_but_not_echoed() {
        let bus = Arc::new(Bus::new());
        let state = ServerState::new(Arc::clone(&bus), "S1");
        let (from, mut a) = peer(&state, "guild-a");
        let (_, mut b) = peer(&state, "guild-b");

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(Channel::MinecraftChat, move |event| {
                seen.lock().unwrap().push(event.meta().origin());
                Ok(())
            });
        }

        let remote = InstanceHandle::new(InstanceIdentity::new("guild-a", InstanceType::Minecraft));
        let text = Frame::from(chat(&remote, "hi")).encode().unwrap();
        state.receive(from.socket_id, &text).unwrap();

        assert_eq!(*seen.lock().unwrap(), [chatbridge_types::Origin::Remote]);
        // Relayed verbatim to the other peer, never back to the sender.
        assert_eq!(b.try_recv().unwrap(), Outbound::Frame(text));
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn internal_frames_are_fatal() {
        let bus = Arc::new(Bus::new());
        let state = ServerState::new(Arc::clone(&bus), "S1");
        let (from, _a) = peer(&state, "guild-a");

        let main = InstanceHandle::new(InstanceIdentity::new("node", InstanceType::Main));
        let text = Frame::from(chat(&main, "leak")).encode().unwrap();
        let error = state.receive(from.socket_id, &text).unwrap_err();
        assert!(error.is_fatal());
    }

    #[test]
    fn takeover_closes_the_stale_peer() {
        let bus = Arc::new(Bus::new());
        let state = ServerState::new(Arc::clone(&bus), "S1");
        let (stale, mut stale_rx) = peer(&state, "guild-a");

        let fresh = state
            .admit(Handshake {
                instances: vec![InstanceIdentity::new("guild-a", InstanceType::Minecraft)],
                previous: Some(stale.socket_id),
            })
            .unwrap();
        let (tx, _fresh_rx) = mpsc::unbounded_channel();
        state.attach(fresh, tx);
        assert_eq!(stale_rx.try_recv().unwrap(), Outbound::Close);

        // The stale task detaching must not evict the fresh peer.
        state.detach(stale);
        assert_eq!(state.connected(), [fresh.socket_id]);
        assert_eq!(state.sessions().len(), 1);
    }

    #[test]
    fn close_all_stops_forwarding_and_refuses_new_peers() {
        let bus = Arc::new(Bus::new());
        let state = ServerState::new(Arc::clone(&bus), "S1");
        let (_, mut a) = peer(&state, "guild-a");

        assert_eq!(state.close_all(), 1);
        assert_eq!(a.try_recv().unwrap(), Outbound::Close);
        assert_eq!(bus.wildcard_count(), 0);
        assert!(state.connected().is_empty());
        assert_eq!(state.close_all(), 0);

        let local = InstanceHandle::new(InstanceIdentity::new("hub", InstanceType::Discord));
        bus.publish(&chat(&local, "after close")).unwrap();
        assert!(a.try_recv().is_err());

        let (late, mut late_rx) = peer(&state, "guild-b");
        assert_eq!(late_rx.try_recv().unwrap(), Outbound::Close);
        state.detach(late);
        assert!(state.connected().is_empty());
    }

    #[test]
    fn state_drop_removes_the_forwarder() {
        let bus = Arc::new(Bus::new());
        let state = ServerState::new(Arc::clone(&bus), "S1");
        assert_eq!(bus.wildcard_count(), 1);
        drop(state);
        assert_eq!(bus.wildcard_count(), 0);
    }
}
