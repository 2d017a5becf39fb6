//! Node configuration loading and validation

use crate::detector::DetectorConfig;
use crate::protocol::Channel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Smallest ring the failure detector may run on.
pub const MIN_RING_SIZE_FLOOR: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("No gateway configured")]
    MissingGateway,

    #[error("min_ring_size must be at least {MIN_RING_SIZE_FLOOR}, got {0}")]
    RingTooSmall(usize),

    #[error("loss_percent must be 0-100, got {0}")]
    LossOutOfRange(u8),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Channels share port {0}")]
    PortClash(u16),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Listening port per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Peer envelopes (default: 50000)
    #[serde(default = "default_peer_port")]
    pub peer: u16,

    /// Gateway ring updates (default: 50001)
    #[serde(default = "default_ring_port")]
    pub ring: u16,

    /// Gateway catalog snapshots (default: 50002)
    #[serde(default = "default_catalog_port")]
    pub catalog: u16,
}

impl PortConfig {
    /// Port a channel listens on.
    pub fn port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Peer => self.peer,
            Channel::Ring => self.ring,
            Channel::Catalog => self.catalog,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            peer: default_peer_port(),
            ring: default_ring_port(),
            catalog: default_catalog_port(),
        }
    }
}

fn default_peer_port() -> u16 {
    50000
}

fn default_ring_port() -> u16 {
    50001
}

fn default_catalog_port() -> u16 {
    50002
}

/// Configuration for a ring node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Host that arbitrates joins and owns the catalog
    #[serde(default)]
    pub gateway: String,

    /// Ring size below which no probing happens (default: 4)
    #[serde(default = "default_min_ring_size")]
    pub min_ring_size: usize,

    /// Heartbeat silence before a successor is declared failed (default: 2500ms)
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// SYN period (default: 1000ms)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Percentage of SYN/ACK/Leave/Failed packets to drop (default: 0)
    #[serde(default)]
    pub loss_percent: u8,

    #[serde(default)]
    pub ports: PortConfig,

    /// Directory holding this node's file replicas (default: "ring_files")
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
}

fn default_min_ring_size() -> usize {
    MIN_RING_SIZE_FLOOR
}

fn default_ack_timeout_ms() -> u64 {
    2500
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_store_dir() -> String {
    "ring_files".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            gateway: String::new(),
            min_ring_size: default_min_ring_size(),
            ack_timeout_ms: default_ack_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            loss_percent: 0,
            ports: PortConfig::default(),
            store_dir: default_store_dir(),
        }
    }
}

impl NodeConfig {
    /// Default configuration pointing at `gateway`.
    pub fn with_gateway(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: NodeConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.trim().is_empty() {
            return Err(ConfigError::MissingGateway);
        }
        if self.min_ring_size < MIN_RING_SIZE_FLOOR {
            return Err(ConfigError::RingTooSmall(self.min_ring_size));
        }
        if self.loss_percent > 100 {
            return Err(ConfigError::LossOutOfRange(self.loss_percent));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("ack_timeout_ms"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("heartbeat_interval_ms"));
        }

        let ports = self.ports;
        if ports.peer == ports.ring || ports.peer == ports.catalog {
            return Err(ConfigError::PortClash(ports.peer));
        }
        if ports.ring == ports.catalog {
            return Err(ConfigError::PortClash(ports.ring));
        }
        Ok(())
    }

    /// Failure detector settings derived from this configuration.
    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            min_ring_size: self.min_ring_size,
            ..DetectorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::with_gateway("10.0.0.1");
        assert!(config.validate().is_ok());
        assert_eq!(config.ports.port(Channel::Peer), 50000);
        assert_eq!(config.ports.port(Channel::Ring), 50001);
        assert_eq!(config.ports.port(Channel::Catalog), 50002);

        let det = config.detector();
        assert_eq!(det.ack_timeout, Duration::from_millis(2500));
        assert_eq!(det.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(det.min_ring_size, 4);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"gateway":"gw","ports":{"peer":6000}}"#).unwrap();

        assert_eq!(config.gateway, "gw");
        assert_eq!(config.ports.peer, 6000);
        assert_eq!(config.ports.ring, 50001);
        assert_eq!(config.store_dir, "ring_files");
        assert_eq!(config.ack_timeout_ms, 2500);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = NodeConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingGateway)));

        config.gateway = "gw".into();
        config.min_ring_size = 3;
        assert!(matches!(config.validate(), Err(ConfigError::RingTooSmall(3))));

        config.min_ring_size = 4;
        config.loss_percent = 101;
        assert!(matches!(config.validate(), Err(ConfigError::LossOutOfRange(101))));

        config.loss_percent = 30;
        config.ports.catalog = config.ports.ring;
        assert!(matches!(config.validate(), Err(ConfigError::PortClash(50001))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"gateway":"10.0.0.1","loss_percent":20}}"#).unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.gateway, "10.0.0.1");
        assert_eq!(config.loss_percent, 20);
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = NodeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
