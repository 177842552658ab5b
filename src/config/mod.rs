//! # Configuration
//!
//! One TOML file drives both roles. Every option has a default, so a partial file (or the output
//! of `amulink init`) is enough to start:
//!
//! ```toml
//! [radio]
//! port = "/dev/ttyS0"
//! baud_rate = 115200
//! network_id = 6
//! band = 915000000
//!
//! [node]
//! node_id = 4
//! base_id = 1
//! max_retries = 3
//! retry_delay_min_secs = 15
//! retry_delay_max_secs = 80
//! waypoints = [[33.686377, -117.789653], [33.6851, -117.7905]]
//!
//! [base]
//! address = 1
//!
//! [logging]
//! level = "info"
//! mission_file = "logs/mission.log"
//! ```
//!
//! [`Config::load`] parses and then [`Config::validate`]s; a file that parses but breaks a
//! constraint is rejected with a [`ConfigError`].

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::node::backoff::BackoffPolicy;
use crate::protocol::message::Waypoint;
use crate::radio::ModemSettings;

/// Largest accepted `max_retries`. Bounds the backoff growth factor at 2^9.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Largest accepted `tx_interval_secs` (one day).
pub const MAX_TX_INTERVAL_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("node.max_retries must be between 1 and 10, got {0}")]
    MaxRetries(u32),

    #[error("node.retry_delay_min_secs ({min}) exceeds node.retry_delay_max_secs ({max})")]
    RetryWindow { min: u64, max: u64 },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("node.node_id must be non-zero (address 0 is broadcast)")]
    BroadcastNodeId,

    #[error("waypoint {index} is out of range: ({lat}, {lon})")]
    Waypoint { index: usize, lat: f64, lon: f64 },

    #[error("radio.port must not be empty")]
    EmptyPort,

    #[error("node.tx_interval_secs must be between 0 and 86400, got {0}")]
    TxInterval(f64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub base: BaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub port: String,
    pub baud_rate: u32,
    pub network_id: u8,
    /// Carrier frequency in Hz.
    pub band: u32,
    /// Minimum gap between two transmissions (ms).
    pub min_send_gap_ms: u64,
    pub read_poll_ms: u64,
    /// How long to swallow modem replies after the setup sequence (ms).
    pub setup_settle_ms: u64,
    /// Grace period for the radio tasks to stop before they are aborted (ms).
    pub shutdown_grace_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyS0".to_string(),
            baud_rate: 115200,
            network_id: 6,
            band: 915_000_000,
            min_send_gap_ms: 150,
            read_poll_ms: 10,
            setup_settle_ms: 1000,
            shutdown_grace_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: u16,
    pub base_id: u16,
    /// Defaults to `AMU_<node_id:02>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub role: String,
    pub mission_name: String,
    pub max_retries: u32,
    pub registration_timeout_ms: u64,
    /// Fixed per-attempt wait for a waypoint acknowledgment, independent of payload size.
    pub ack_timeout_ms: u64,
    pub retry_delay_min_secs: u64,
    pub retry_delay_max_secs: u64,
    /// Stable per-node jitter unit: the delay gains `backoff_jitter_ms * (node_id % 3)`.
    pub backoff_jitter_ms: u64,
    /// Pause after an acknowledged waypoint before sending the next (seconds, fractional ok).
    pub tx_interval_secs: f64,
    pub waypoints: Vec<[f64; 2]>,
    /// Optional CSV copy of the mission records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_file: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            base_id: 1,
            label: None,
            role: "scout".to_string(),
            mission_name: "Test Route".to_string(),
            max_retries: 3,
            registration_timeout_ms: 5000,
            ack_timeout_ms: 5000,
            retry_delay_min_secs: 15,
            retry_delay_max_secs: 80,
            backoff_jitter_ms: 1000,
            tx_interval_secs: 0.0,
            waypoints: Vec::new(),
            csv_file: None,
        }
    }
}

impl NodeConfig {
    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("AMU_{:02}", self.node_id))
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        self.waypoints.iter().copied().map(Waypoint::from).collect()
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.retry_delay_min_secs),
            Duration::from_secs(self.retry_delay_max_secs),
            Duration::from_millis(self.backoff_jitter_ms),
        )
    }

    /// Zero for negative, non-finite or unrepresentable values.
    pub fn tx_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.tx_interval_secs).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    pub address: u16,
    /// Interval for the fleet summary log line (seconds, 0 disables).
    pub summary_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_file: Option<String>,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            address: 1,
            summary_interval_secs: 300,
            csv_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Destination for records on the `mission` log target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mission_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("amulink.log".to_string()),
            mission_file: Some("logs/mission.log".to_string()),
        }
    }
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;

        Ok(config)
    }

    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let node = &self.node;
        if node.max_retries == 0 || node.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::MaxRetries(node.max_retries));
        }
        if node.retry_delay_min_secs > node.retry_delay_max_secs {
            return Err(ConfigError::RetryWindow {
                min: node.retry_delay_min_secs,
                max: node.retry_delay_max_secs,
            });
        }
        if node.node_id == 0 {
            return Err(ConfigError::BroadcastNodeId);
        }
        for (field, value) in [
            ("node.ack_timeout_ms", node.ack_timeout_ms),
            ("node.registration_timeout_ms", node.registration_timeout_ms),
            ("radio.baud_rate", u64::from(self.radio.baud_rate)),
            ("radio.read_poll_ms", self.radio.read_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        for (index, [lat, lon]) in node.waypoints.iter().copied().enumerate() {
            let valid = lat.is_finite()
                && lon.is_finite()
                && (-90.0..=90.0).contains(&lat)
                && (-180.0..=180.0).contains(&lon);
            if !valid {
                return Err(ConfigError::Waypoint { index, lat, lon });
            }
        }
        if !(0.0..=MAX_TX_INTERVAL_SECS).contains(&node.tx_interval_secs) {
            return Err(ConfigError::TxInterval(node.tx_interval_secs));
        }
        if self.radio.port.trim().is_empty() {
            return Err(ConfigError::EmptyPort);
        }
        Ok(())
    }

    pub fn node_modem(&self) -> ModemSettings {
        ModemSettings {
            address: self.node.node_id,
            network_id: self.radio.network_id,
            band: self.radio.band,
        }
    }

    pub fn base_modem(&self) -> ModemSettings {
        ModemSettings {
            address: self.base.address,
            network_id: self.radio.network_id,
            band: self.radio.band,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_field_unit_baseline() {
        let cfg = Config::default();
        assert_eq!(cfg.node.node_id, 1);
        assert_eq!(cfg.node.base_id, 1);
        assert_eq!(cfg.node.label(), "AMU_01");
        assert_eq!(cfg.node.max_retries, 3);
        assert_eq!(cfg.node.backoff().base_window(), (Duration::from_secs(15), Duration::from_secs(80)));
        assert_eq!(cfg.radio.port, "/dev/ttyS0");
        assert_eq!(cfg.radio.baud_rate, 115200);
        assert_eq!(cfg.radio.network_id, 6);
        assert_eq!(cfg.radio.band, 915_000_000);
        assert_eq!(cfg.base.address, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [node]
            node_id = 12
            waypoints = [[33.686377, -117.789653]]
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.node.label(), "AMU_12");
        assert_eq!(cfg.node.waypoints(), vec![Waypoint::new(33.686377, -117.789653)]);
        assert_eq!(cfg.node.ack_timeout_ms, 5000);
        assert_eq!(cfg.radio.network_id, 6);
    }

    #[test]
    fn retry_cap_is_enforced() {
        let mut cfg = Config::default();
        cfg.node.max_retries = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::MaxRetries(0)));
        cfg.node.max_retries = 11;
        assert_eq!(cfg.validate(), Err(ConfigError::MaxRetries(11)));
        cfg.node.max_retries = 10;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_window_and_bad_waypoints_rejected() {
        let mut cfg = Config::default();
        cfg.node.retry_delay_min_secs = 90;
        assert!(matches!(cfg.validate(), Err(ConfigError::RetryWindow { .. })));

        let mut cfg = Config::default();
        cfg.node.waypoints = vec![[33.0, -117.0], [95.0, 0.0]];
        assert!(matches!(cfg.validate(), Err(ConfigError::Waypoint { index: 1, .. })));
    }

    #[test]
    fn tx_interval_ignores_nonsense() {
        let mut node = NodeConfig::default();
        assert_eq!(node.tx_interval(), Duration::ZERO);
        node.tx_interval_secs = 1.5;
        assert_eq!(node.tx_interval(), Duration::from_millis(1500));
        node.tx_interval_secs = -3.0;
        assert_eq!(node.tx_interval(), Duration::ZERO);
        node.tx_interval_secs = 1e30;
        assert_eq!(node.tx_interval(), Duration::ZERO);
        node.tx_interval_secs = f64::NAN;
        assert_eq!(node.tx_interval(), Duration::ZERO);
    }

    #[test]
    fn oversized_tx_interval_is_rejected() {
        let mut cfg = Config::default();
        cfg.node.tx_interval_secs = 1e30;
        assert_eq!(cfg.validate(), Err(ConfigError::TxInterval(1e30)));
        cfg.node.tx_interval_secs = -1.0;
        assert_eq!(cfg.validate(), Err(ConfigError::TxInterval(-1.0)));
        cfg.node.tx_interval_secs = f64::NAN;
        assert!(matches!(cfg.validate(), Err(ConfigError::TxInterval(_))));
        cfg.node.tx_interval_secs = MAX_TX_INTERVAL_SECS;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.node.tx_interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn default_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).expect("serialize");
        let back: Config = toml::from_str(&text).expect("parse");
        assert_eq!(back.node.max_retries, 3);
        assert_eq!(back.logging.mission_file.as_deref(), Some("logs/mission.log"));
    }
}
