//! Bridge configuration with validation.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default topic prefix.
pub const DEFAULT_TOPIC_PREFIX: &str = "v3";

/// Largest remaining length an MQTT packet can announce.
pub const MQTT_MAX_PACKET_SIZE: usize = 268_435_455;

/// What happens when a gateway authenticates while already connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Refuse the new session with `AlreadyConnected`.
    #[default]
    Reject,
    /// Close the existing session and install the new one.
    Evict,
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "evict" => Ok(Self::Evict),
            other => Err(ConfigError::UnknownDuplicatePolicy(other.to_string())),
        }
    }
}

/// Main bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// First topic segment, e.g. `v3` in `v3/<gateway>/up`
    pub topic_prefix: String,
    /// Duplicate authentication policy
    pub duplicate_policy: DuplicatePolicy,
    /// Per-connection queue capacities
    pub queues: QueueConfig,
    /// Session limits and timeouts
    pub session: SessionConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            duplicate_policy: DuplicatePolicy::default(),
            queues: QueueConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_prefix.is_empty()
            || self
                .topic_prefix
                .chars()
                .any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace() || c.is_control())
        {
            return Err(ConfigError::InvalidTopicPrefix(self.topic_prefix.clone()));
        }

        if self.queues.uplink_capacity == 0 {
            return Err(ConfigError::InvalidCapacity("uplink_capacity"));
        }
        if self.queues.status_capacity == 0 {
            return Err(ConfigError::InvalidCapacity("status_capacity"));
        }
        if self.queues.downlink_capacity == 0 {
            return Err(ConfigError::InvalidCapacity("downlink_capacity"));
        }

        if self.session.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("connect_timeout_ms"));
        }
        if self.session.auth_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("auth_timeout_ms"));
        }
        if self.session.write_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("write_timeout_ms"));
        }

        if self.session.max_packet_size < 64 || self.session.max_packet_size > MQTT_MAX_PACKET_SIZE
        {
            return Err(ConfigError::InvalidLimit(format!(
                "max_packet_size must be within 64..={}",
                MQTT_MAX_PACKET_SIZE
            )));
        }
        if self.session.max_sessions == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_sessions cannot be 0".into(),
            ));
        }
        if self.session.downlink_qos > 2 {
            return Err(ConfigError::InvalidQos(self.session.downlink_qos));
        }
        if self.session.keep_alive_grace_percent < 100 {
            return Err(ConfigError::InvalidLimit(
                "keep_alive_grace_percent must be at least 100".into(),
            ));
        }

        Ok(())
    }
}

/// Per-connection queue capacities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub uplink_capacity: usize,
    pub status_capacity: usize,
    pub downlink_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            uplink_capacity: 256,
            status_capacity: 32,
            downlink_capacity: 64,
        }
    }
}

/// Session limits and timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time allowed for the client to send CONNECT
    pub connect_timeout_ms: u64,
    /// Time allowed for the validator to answer
    pub auth_timeout_ms: u64,
    /// Time allowed for one packet to reach the socket
    pub write_timeout_ms: u64,
    /// Largest accepted MQTT packet (remaining length)
    pub max_packet_size: usize,
    /// Concurrent sessions; excess sockets are closed on accept
    pub max_sessions: usize,
    /// Dropped messages tolerated before the session is closed (0 = unlimited)
    pub violation_limit: u32,
    /// Highest QoS granted on the downlink subscription
    pub downlink_qos: u8,
    /// Keep-alive deadline as a percentage of the negotiated interval
    pub keep_alive_grace_percent: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            auth_timeout_ms: 5_000,
            write_timeout_ms: 10_000,
            max_packet_size: 256 * 1024,
            max_sessions: 10_000,
            violation_limit: 0,
            downlink_qos: 1,
            keep_alive_grace_percent: 150,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Inactivity deadline for a negotiated keep-alive, `None` when disabled.
    pub fn keep_alive_deadline(&self, keep_alive_secs: u16) -> Option<Duration> {
        if keep_alive_secs == 0 {
            return None;
        }
        let millis = u64::from(keep_alive_secs) * 1_000 * u64::from(self.keep_alive_grace_percent)
            / 100;
        Some(Duration::from_millis(millis))
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid topic prefix: {0:?}")]
    InvalidTopicPrefix(String),
    #[error("Queue capacity {0} cannot be 0")]
    InvalidCapacity(&'static str),
    #[error("Timeout {0} cannot be 0")]
    InvalidTimeout(&'static str),
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),
    #[error("Invalid downlink QoS: {0}")]
    InvalidQos(u8),
    #[error("Unknown duplicate policy: {0:?}")]
    UnknownDuplicatePolicy(String),
}

impl From<ConfigError> for super::errors::GatewayError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BridgeConfig::default().validate().is_ok());
        assert_eq!(BridgeConfig::default().topic_prefix, "v3");
    }

    #[test]
    fn test_rejects_prefix_with_separator() {
        let config = BridgeConfig {
            topic_prefix: "v3/eu".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTopicPrefix(_))
        ));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut config = BridgeConfig::default();
        config.queues.uplink_capacity = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidCapacity("uplink_capacity"))
        );
    }

    #[test]
    fn test_rejects_zero_write_timeout() {
        let mut config = BridgeConfig::default();
        config.session.write_timeout_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTimeout("write_timeout_ms"))
        );
    }

    #[test]
    fn test_rejects_invalid_qos() {
        let mut config = BridgeConfig::default();
        config.session.downlink_qos = 3;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQos(3)));
    }

    #[test]
    fn test_keep_alive_deadline() {
        let session = SessionConfig::default();
        assert_eq!(session.keep_alive_deadline(0), None);
        assert_eq!(
            session.keep_alive_deadline(60),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_duplicate_policy_parsing() {
        assert_eq!("evict".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Evict));
        assert_eq!(" Reject ".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
        assert!("takeover".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"duplicate_policy":"evict","session":{"violation_limit":5}}"#)
                .unwrap();
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Evict);
        assert_eq!(config.session.violation_limit, 5);
        assert_eq!(config.session.auth_timeout_ms, 5_000);
        assert_eq!(config.topic_prefix, "v3");
    }
}
