//! Configuration loading and typed config structures for a chatbridge node.
//!
//! The node reads `chatbridge-config.yaml` from its working directory. Every
//! field has a default, so an empty or missing file yields a runnable
//! standalone node with replication disabled.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Default config file name.
pub const CONFIG_FILE: &str = "chatbridge-config.yaml";

/// Overrides `socket.key`.
pub const ENV_SOCKET_KEY: &str = "CHATBRIDGE_SOCKET_KEY";

/// Overrides `socket.uri`.
pub const ENV_SOCKET_URI: &str = "CHATBRIDGE_SOCKET_URI";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level node configuration, mirroring `chatbridge-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Identity of this node.
    #[serde(default)]
    pub node: NodeConfig,

    /// Replication transport settings.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Chat correlation deadlines.
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

impl BridgeConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides:
    /// - `CHATBRIDGE_SOCKET_KEY` overrides `socket.key`
    /// - `CHATBRIDGE_SOCKET_URI` overrides `socket.uri`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.socket.apply_env_overrides();
        Ok(config)
    }
}

/// Node identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    /// Name of the node's main instance.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
        }
    }
}

/// Which end of the replication link this node runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    /// Accept peers.
    #[default]
    Server,
    /// Connect to a server.
    Client,
}

/// Replication transport settings.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SocketConfig {
    /// Whether replication runs at all.
    #[serde(default)]
    pub enabled: bool,

    /// Server or client.
    #[serde(default)]
    pub mode: SocketMode,

    /// Port the server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// URI the client connects to.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Shared secret presented in the `Authentication` header.
    #[serde(default)]
    pub key: String,

    /// Delay between client reconnect attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl SocketConfig {
    /// Apply `CHATBRIDGE_SOCKET_KEY` and `CHATBRIDGE_SOCKET_URI`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_SOCKET_KEY) {
            self.key = val;
        }
        if let Some(val) = lookup(ENV_SOCKET_URI) {
            self.uri = val;
        }
    }

    /// Reconnect delay as a [`Duration`].
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: SocketMode::default(),
            port: default_port(),
            uri: default_uri(),
            key: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl core::fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SocketConfig")
            .field("enabled", &self.enabled)
            .field("mode", &self.mode)
            .field("port", &self.port)
            .field("uri", &self.uri)
            .field("key", &"[REDACTED]")
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .finish()
    }
}

/// Deadlines for chat correlation, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CorrelationConfig {
    /// `/guild list` deadline.
    #[serde(default = "default_short_timeout_ms")]
    pub roster_timeout_ms: u64,

    /// `/guild motd preview` deadline.
    #[serde(default = "default_short_timeout_ms")]
    pub motd_timeout_ms: u64,

    /// `/guild log` deadline.
    #[serde(default = "default_log_timeout_ms")]
    pub log_timeout_ms: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            roster_timeout_ms: default_short_timeout_ms(),
            motd_timeout_ms: default_short_timeout_ms(),
            log_timeout_ms: default_log_timeout_ms(),
        }
    }
}

fn default_instance_name() -> String {
    String::from("chatbridge")
}

const fn default_port() -> u16 {
    8443
}

fn default_uri() -> String {
    String::from("ws://127.0.0.1:8443")
}

const fn default_reconnect_delay_ms() -> u64 {
    10_000
}

const fn default_short_timeout_ms() -> u64 {
    10_000
}

const fn default_log_timeout_ms() -> u64 {
    20_000
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_standalone() {
        let config = BridgeConfig::default();
        assert!(!config.socket.enabled);
        assert_eq!(config.socket.mode, SocketMode::Server);
        assert_eq!(config.socket.reconnect_delay(), Duration::from_secs(10));
        assert_eq!(config.correlation.roster_timeout_ms, 10_000);
        assert_eq!(config.correlation.motd_timeout_ms, 10_000);
        assert_eq!(config.correlation.log_timeout_ms, 20_000);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
node:
  instance_name: "relay-eu"

socket:
  enabled: true
  mode: client
  port: 9000
  uri: "ws://hub.example:9000"
  key: "S1"
  reconnect_delay_ms: 2500

correlation:
  roster_timeout_ms: 5000
  motd_timeout_ms: 6000
  log_timeout_ms: 7000
"#;
        let mut config: BridgeConfig = serde_yml::from_str(yaml).unwrap();
        config.socket.apply_overrides_from(|_| None);

        assert_eq!(config.node.instance_name, "relay-eu");
        assert!(config.socket.enabled);
        assert_eq!(config.socket.mode, SocketMode::Client);
        assert_eq!(config.socket.port, 9000);
        assert_eq!(config.socket.uri, "ws://hub.example:9000");
        assert_eq!(config.socket.key, "S1");
        assert_eq!(config.socket.reconnect_delay_ms, 2500);
        assert_eq!(config.correlation.log_timeout_ms, 7000);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config: BridgeConfig = serde_yml::from_str("socket:\n  enabled: true\n").unwrap();
        assert!(config.socket.enabled);
        assert_eq!(config.socket.port, 8443);
        assert_eq!(config.node.instance_name, "chatbridge");
        assert_eq!(config.correlation, CorrelationConfig::default());
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(BridgeConfig::parse("").is_ok());
    }

    #[test]
    fn env_overrides_replace_key_and_uri() {
        let mut socket = SocketConfig::default();
        socket.apply_overrides_from(|name| match name {
            ENV_SOCKET_KEY => Some(String::from("from-env")),
            _ => None,
        });
        assert_eq!(socket.key, "from-env");
        assert_eq!(socket.uri, "ws://127.0.0.1:8443");
    }

    #[test]
    fn debug_redacts_key() {
        let socket = SocketConfig {
            key: String::from("hunter2"),
            ..SocketConfig::default()
        };
        assert!(!format!("{socket:?}").contains("hunter2"));
    }
}
