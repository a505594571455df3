//! A running chatbridge node.
//!
//! [`Node::start`] builds the local bus, registers the node's own
//! instances, and starts whichever end of the replication link the config
//! asks for. Domain instances (guild clients, chat bridges) attach to
//! [`Node::bus`] and [`Node::instances`] afterwards.

use std::sync::Arc;

use chatbridge_core::config::SocketConfig;
use chatbridge_core::{
    BridgeConfig, Bus, ChatCorrelator, CorrelationTimeouts, HandlerError, InstanceBook,
    InstanceHandle, SocketMode, SubscriptionId,
};
use chatbridge_socket::{
    ClientConfig, ReplicationClient, ServerConfig, ServerHandle, spawn_client, spawn_server,
};
use chatbridge_types::{InstanceIdentity, InstanceStatus, InstanceType, StatusVisibility};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::NodeError;

/// Suffix of the instance that issues guild queries on the node's behalf.
const BRIDGE_SUFFIX: &str = "-bridge";

/// The running end of the replication link, if any.
#[derive(Debug)]
pub enum Replication {
    /// Replication is switched off.
    Disabled,
    /// Accepting peers.
    Server(ServerHandle),
    /// Linked to a server.
    Client {
        /// The client, for state inspection.
        client: Arc<ReplicationClient>,
        /// The reconnect loop.
        task: JoinHandle<()>,
    },
}

/// A started node.
#[derive(Debug)]
pub struct Node {
    bus: Arc<Bus>,
    instances: Arc<InstanceBook>,
    main: Arc<InstanceHandle>,
    bridge: Arc<InstanceHandle>,
    correlator: Arc<ChatCorrelator>,
    replication: Replication,
    tracer: SubscriptionId,
}

impl Node {
    /// Build the bus, register the node's instances, and start replication.
    ///
    /// The main instance is process-local. Guild queries go out under a
    /// separate chat-bridge instance so they can reach guild clients on
    /// other nodes.
    pub async fn start(config: &BridgeConfig) -> Result<Self, NodeError> {
        let bus = Arc::new(Bus::new());
        let tracer = bus.subscribe_all(|event| {
            debug!(
                channel = %event.channel(),
                instance = %event.meta().identity(),
                event_id = %event.meta().event_id,
                origin = ?event.meta().origin(),
                "bus event"
            );
            Ok::<(), HandlerError>(())
        });

        let name = &config.node.instance_name;
        let instances = Arc::new(InstanceBook::new());
        let main = instances.register(InstanceIdentity::new(name.clone(), InstanceType::Main));
        let bridge = instances.register(InstanceIdentity::new(
            format!("{name}{BRIDGE_SUFFIX}"),
            InstanceType::Discord,
        ));

        // Replication goes first so the announcements below reach peers.
        let replication = start_replication(&config.socket, &bus, &instances).await?;

        for handle in instances.handles() {
            handle.announce(&bus)?;
            handle.set_status(
                &bus,
                InstanceStatus::Connected,
                "instance started",
                StatusVisibility::Silent,
            )?;
        }

        let correlator = Arc::new(ChatCorrelator::new(
            Arc::clone(&bus),
            Arc::clone(&bridge),
            CorrelationTimeouts::from(&config.correlation),
        ));

        info!(
            instance = %main.identity(),
            bridge = %bridge.identity(),
            replication = replication.describe(),
            "node started"
        );

        Ok(Self {
            bus,
            instances,
            main,
            bridge,
            correlator,
            replication,
            tracer,
        })
    }

    /// The node's event bus.
    pub const fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Instances owned by this node.
    pub const fn instances(&self) -> &Arc<InstanceBook> {
        &self.instances
    }

    /// Guild query engine.
    pub const fn correlator(&self) -> &Arc<ChatCorrelator> {
        &self.correlator
    }

    /// Running replication endpoint.
    pub const fn replication(&self) -> &Replication {
        &self.replication
    }

    /// Mark every instance ended and stop replication.
    pub fn shutdown(self) -> Result<(), NodeError> {
        for handle in self.instances.handles() {
            handle.set_status(
                &self.bus,
                InstanceStatus::Ended,
                "node shutting down",
                StatusVisibility::Silent,
            )?;
        }
        match self.replication {
            Replication::Disabled => {}
            Replication::Server(server) => server.shutdown(),
            Replication::Client { task, .. } => task.abort(),
        }
        self.bus.unsubscribe(self.tracer);
        info!(
            instance = %self.main.identity(),
            bridge = %self.bridge.identity(),
            "node stopped"
        );
        Ok(())
    }
}

impl Replication {
    const fn describe(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Server(_) => "server",
            Self::Client { .. } => "client",
        }
    }
}

async fn start_replication(
    socket: &SocketConfig,
    bus: &Arc<Bus>,
    instances: &Arc<InstanceBook>,
) -> Result<Replication, NodeError> {
    if !socket.enabled {
        return Ok(Replication::Disabled);
    }
    match socket.mode {
        SocketMode::Server => {
            let server = ServerConfig {
                port: socket.port,
                ..ServerConfig::default()
            };
            let handle = spawn_server(&server, Arc::clone(bus), socket.key.clone()).await?;
            info!(addr = %handle.local_addr(), "replication server listening");
            Ok(Replication::Server(handle))
        }
        SocketMode::Client => {
            let (client, task) = spawn_client(
                ClientConfig {
                    uri: socket.uri.clone(),
                    key: socket.key.clone(),
                    reconnect_delay: socket.reconnect_delay(),
                },
                Arc::clone(bus),
                Arc::clone(instances),
            );
            info!(uri = %socket.uri, "replication client started");
            Ok(Replication::Client { client, task })
        }
    }
}
