//! Event bus, correlators and chat correlation for chatbridge nodes.
//!
//! Every instance in a node talks to every other instance exclusively
//! through the [`Bus`]. This crate owns that bus and the machinery built
//! directly on top of it.
//!
//! # Modules
//!
//! - [`bus`] -- Synchronous typed publish/subscribe with a wildcard
//!   observation channel.
//! - [`correlator`] -- Single-assignment value with a resettable deadline.
//! - [`queue`] -- Per-key FIFO task queues with a concurrency of one.
//! - [`instances`] -- Locally owned instances: event-id counters, status
//!   tracking and state rebroadcast.
//! - [`chat`] -- Turns outbound chat commands plus unstructured inbound chat
//!   lines into cached, structured query results.
//! - [`config`] -- Configuration loading from `chatbridge-config.yaml`.
//!
//! [`Bus`]: bus::Bus

pub mod bus;
pub mod chat;
pub mod config;
pub mod correlator;
pub mod instances;
pub mod queue;

pub use bus::{Bus, BusError, HandlerError, Subscription, SubscriptionId};
pub use chat::{ChatCorrelator, ChatProtocolError, CorrelationError, CorrelationTimeouts};
pub use config::{BridgeConfig, ConfigError, SocketMode};
pub use correlator::{Correlator, CorrelatorError};
pub use instances::{InstanceBook, InstanceHandle};
pub use queue::SerialQueue;
