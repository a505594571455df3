//! Node wiring for chatbridge.
//!
//! A node owns one event bus, the instances registered on it, the guild
//! query engine, and at most one end of a replication link. The
//! `chatbridge-node` binary starts a [`node::Node`] from
//! `chatbridge-config.yaml` and runs it until interrupted.

pub mod error;
pub mod node;

pub use error::NodeError;
pub use node::{Node, Replication};
