//! Service settings (YAML-loadable, partially refreshable at runtime).
//!
//! Example YAML:
//! ```yaml
//! cluster_name: "atoll"
//! node:
//!   name: "node-1"
//!   publish_address: "127.0.0.1:9301"
//! cluster:
//!   service:
//!     slow_task_logging_threshold_ms: 30000
//!     reconnect_interval_ms: 10000
//! ```
//!
//! `slow_task_logging_threshold_ms` may be rebound at runtime through
//! `ClusterService::apply_settings`; the new threshold takes effect for the
//! next task.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Settings key for the slow-task warning threshold.
pub const SETTING_SLOW_TASK_LOGGING_THRESHOLD: &str =
    "cluster.service.slow_task_logging_threshold";

/// Settings key for the reconnect loop period.
pub const SETTING_RECONNECT_INTERVAL: &str = "cluster.service.reconnect_interval";

/// Top-level service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name of the cluster this node joins.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Local node identity settings.
    #[serde(default)]
    pub node: NodeSettings,

    /// `cluster.*` settings section.
    #[serde(default)]
    pub cluster: ClusterSection,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            node: NodeSettings::default(),
            cluster: ClusterSection::default(),
        }
    }
}

/// Local node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable node name.
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Publish address for point-to-point transport.
    #[serde(default = "default_publish_address")]
    pub publish_address: SocketAddr,

    /// Free-form node attributes advertised to peers.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            publish_address: default_publish_address(),
            attributes: BTreeMap::new(),
        }
    }
}

/// `cluster.*` settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSection {
    /// `cluster.service.*` settings.
    #[serde(default)]
    pub service: ClusterServiceSettings,
}

/// `cluster.service.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterServiceSettings {
    /// Tasks running longer than this log a warning.
    /// Default: 30000ms
    #[serde(default = "default_slow_task_threshold_ms")]
    pub slow_task_logging_threshold_ms: u64,

    /// Reconnect loop period.
    /// Default: 10000ms
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

impl Default for ClusterServiceSettings {
    fn default() -> Self {
        Self {
            slow_task_logging_threshold_ms: default_slow_task_threshold_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

fn default_cluster_name() -> String {
    "atoll".to_string()
}

fn default_node_name() -> String {
    "atoll-node".to_string()
}

fn default_publish_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9301)
}

fn default_slow_task_threshold_ms() -> u64 {
    30_000
}

fn default_reconnect_interval_ms() -> u64 {
    10_000
}

impl Settings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::Parse(format!("failed to parse YAML: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("failed to read settings file: {}", e)))?;
        Self::from_yaml_str(&content)
    }

    /// Set the cluster name.
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Set the node name.
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node.name = name.into();
        self
    }

    /// Set the slow-task warning threshold.
    pub fn with_slow_task_logging_threshold(mut self, threshold: Duration) -> Self {
        self.cluster.service.slow_task_logging_threshold_ms = threshold.as_millis() as u64;
        self
    }

    /// Set the reconnect loop period.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.cluster.service.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Slow-task warning threshold as a duration.
    pub fn slow_task_logging_threshold(&self) -> Duration {
        Duration::from_millis(self.cluster.service.slow_task_logging_threshold_ms)
    }

    /// Reconnect loop period as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.service.reconnect_interval_ms)
    }

    /// Look up a duration-valued setting by its dotted key.
    ///
    /// Returns `None` for keys that do not name a duration setting. The
    /// recognised keys are [`SETTING_SLOW_TASK_LOGGING_THRESHOLD`] and
    /// [`SETTING_RECONNECT_INTERVAL`].
    pub fn get_as_duration(&self, key: &str) -> Option<Duration> {
        match key {
            SETTING_SLOW_TASK_LOGGING_THRESHOLD => Some(self.slow_task_logging_threshold()),
            SETTING_RECONNECT_INTERVAL => Some(self.reconnect_interval()),
            _ => None,
        }
    }

    /// Validate settings values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.is_empty() {
            return Err(ConfigError::InvalidValue("cluster_name must be set".into()));
        }
        if self.node.name.is_empty() {
            return Err(ConfigError::InvalidValue("node.name must be set".into()));
        }
        if self.cluster.service.reconnect_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "reconnect_interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}
