//! Entry point for a chatbridge node.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `CHATBRIDGE_CONFIG` or `chatbridge-config.yaml`
//! 3. Start the node: bus, own instances, replication endpoint
//! 4. Run until Ctrl-C, then mark instances ended and stop

use std::path::PathBuf;

use chatbridge_core::BridgeConfig;
use chatbridge_core::config::CONFIG_FILE;
use chatbridge_node::{Node, NodeError};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Names an alternative config file.
const ENV_CONFIG_PATH: &str = "CHATBRIDGE_CONFIG";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the replication
/// server cannot bind, or the shutdown signal cannot be awaited.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("chatbridge-node starting");

    let config = load_config()?;
    info!(
        instance_name = config.node.instance_name,
        socket_enabled = config.socket.enabled,
        socket = ?config.socket,
        "configuration loaded"
    );

    let node = Node::start(&config).await?;

    tokio::signal::ctrl_c().await.map_err(NodeError::from)?;
    info!("shutdown requested");
    node.shutdown()?;

    Ok(())
}

/// Load the node config. A missing file yields defaults.
fn load_config() -> Result<BridgeConfig, NodeError> {
    let path = std::env::var_os(ENV_CONFIG_PATH)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    if path.exists() {
        Ok(BridgeConfig::from_file(&path)?)
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        let mut config = BridgeConfig::default();
        config.socket.apply_env_overrides();
        Ok(config)
    }
}
