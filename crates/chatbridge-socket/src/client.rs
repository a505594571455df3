//! Reconnecting replication client.
//!
//! The client keeps one link to a replication server alive forever. Every
//! time a link opens it replays the state of its local instances, so the
//! server side catches up on whatever happened while the link was down.
//! Between attempts it waits a fixed delay; there is no backoff.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chatbridge_core::{Bus, HandlerError, InstanceBook, SubscriptionId};
use chatbridge_types::{BusEvent, Frame, SocketId};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::handshake::{AUTHENTICATION, INSTANCES, SOCKET_ID};

/// Configuration for the replication client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Server URI, e.g. `ws://hub:8443`.
    pub uri: String,
    /// Shared secret.
    pub key: String,
    /// Wait between connection attempts.
    pub reconnect_delay: Duration,
}

impl core::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("uri", &self.uri)
            .field("key", &"[REDACTED]")
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

/// Link state as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No open link.
    Disconnected,
    /// Linked, with the id the server assigned.
    Connected(SocketId),
}

/// A replication client bound to a local bus.
pub struct ReplicationClient {
    config: ClientConfig,
    bus: Arc<Bus>,
    instances: Arc<InstanceBook>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    last_socket_id: Mutex<Option<SocketId>>,
    state: watch::Sender<ConnectionState>,
    forwarder: SubscriptionId,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReplicationClient {
    /// Create a client and start forwarding local events from `bus`. Events
    /// published while no link is open are dropped; the state replay on the
    /// next open covers instance state.
    pub fn new(config: ClientConfig, bus: Arc<Bus>, instances: Arc<InstanceBook>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = Weak::clone(weak);
            let forwarder = bus.subscribe_all(move |event| {
                if let Some(client) = weak.upgrade() {
                    client.forward_local(event);
                }
                Ok::<(), HandlerError>(())
            });
            Self {
                config,
                bus,
                instances,
                outbound: Mutex::new(None),
                last_socket_id: Mutex::new(None),
                state: watch::channel(ConnectionState::Disconnected).0,
                forwarder,
            }
        })
    }

    /// Watch the link state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Id received on the most recent link, presented on the next connect.
    pub fn last_socket_id(&self) -> Option<SocketId> {
        *lock(&self.last_socket_id)
    }

    /// Keep a link open forever, reconnecting after every failure or close.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.connect_once().await {
                Ok(()) => info!(uri = %self.config.uri, "replication link closed"),
                Err(error) => warn!(uri = %self.config.uri, %error, "replication link failed"),
            }
            self.mark_disconnected();
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Open one link and pump it until it closes.
    async fn connect_once(&self) -> Result<(), ClientError> {
        let mut request = self.config.uri.as_str().into_client_request()?;
        let identities = serde_json::to_string(&self.instances.replicable_identities())?;
        let previous = self.last_socket_id();
        let headers = request.headers_mut();
        headers.insert(AUTHENTICATION, HeaderValue::from_str(&self.config.key)?);
        headers.insert(INSTANCES, HeaderValue::from_str(&identities)?);
        headers.insert(SOCKET_ID, HeaderValue::from(SocketId::to_header(previous)));

        debug!(uri = %self.config.uri, ?previous, "opening replication link");
        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut stream) = socket.split();

        let (tx, mut rx) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(tx);
        info!(uri = %self.config.uri, "replication link open");

        if let Err(error) = self.instances.rebroadcast(&self.bus) {
            warn!(%error, "state rebroadcast failed");
        }

        let result = loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(text) = outbound else {
                        break Ok(());
                    };
                    if let Err(error) = sink.send(Message::Text(text.into())).await {
                        break Err(ClientError::from(error));
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => self.receive(text.as_str()),
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(error) = sink.send(Message::Pong(data)).await {
                                break Err(ClientError::from(error));
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Err(error)) => break Err(ClientError::from(error)),
                        Some(Ok(_)) => {}
                    }
                }
            }
        };

        *lock(&self.outbound) = None;
        result
    }

    fn mark_disconnected(&self) {
        *lock(&self.outbound) = None;
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Handle one text frame from the server.
    fn receive(&self, text: &str) {
        match Frame::decode(text) {
            Ok(Frame::ConnectionInfo(info)) => {
                *lock(&self.last_socket_id) = Some(info.socket_id);
                self.state
                    .send_replace(ConnectionState::Connected(info.socket_id));
                info!(socket_id = %info.socket_id, "replication session established");
            }
            Ok(Frame::Application(event)) if event.is_internal() => {
                warn!(
                    identity = %event.meta().identity(),
                    "dropping internal event received over the wire"
                );
            }
            Ok(Frame::Application(event)) => {
                if let Err(error) = self.bus.publish(&event) {
                    warn!(%error, "republishing remote event failed");
                }
            }
            Err(error) => warn!(%error, "dropping undecodable replication frame"),
        }
    }

    /// Forward a local bus event over the open link, if any.
    fn forward_local(&self, event: &BusEvent) {
        if !event.is_replicable() {
            return;
        }
        let Some(tx) = lock(&self.outbound).clone() else {
            return;
        };
        match Frame::Application(event.clone()).encode() {
            Ok(text) => {
                tx.send(text).ok();
            }
            Err(error) => {
                warn!(channel = %event.channel(), %error, "failed to encode local event");
            }
        }
    }
}

impl Drop for ReplicationClient {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.forwarder);
    }
}

impl core::fmt::Debug for ReplicationClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReplicationClient")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
