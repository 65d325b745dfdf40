//! Transport timings shared by every endpoint

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat, timeout and reconnect settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Interval between client pings, in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Heartbeat intervals without traffic before a connection is dead
    pub missed_heartbeats_threshold: u32,

    /// TCP connect and handshake timeout, in milliseconds
    pub connect_timeout_ms: u64,

    /// First reconnect delay, in milliseconds
    pub reconnect_min_ms: u64,

    /// Reconnect delay ceiling, in milliseconds
    pub reconnect_max_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            missed_heartbeats_threshold: 3,
            connect_timeout_ms: 10_000,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 60_000,
        }
    }
}

impl TransportConfig {
    /// Set heartbeat interval
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set reconnect backoff bounds
    pub fn with_reconnect(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_min_ms = min.as_millis() as u64;
        self.reconnect_max_ms = max.as_millis() as u64;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Heartbeat interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Connect and handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Silence after which a connection is considered dead
    pub fn dead_after(&self) -> Duration {
        self.heartbeat_interval() * self.missed_heartbeats_threshold
    }

    /// First reconnect delay
    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    /// Reconnect delay ceiling
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be at least 1".into());
        }

        if self.missed_heartbeats_threshold == 0 {
            return Err("missed_heartbeats_threshold must be at least 1".into());
        }

        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be at least 1".into());
        }

        if self.reconnect_min_ms == 0 || self.reconnect_min_ms > self.reconnect_max_ms {
            return Err("reconnect_min_ms must be in 1..=reconnect_max_ms".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dead_after(), Duration::from_secs(15));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = TransportConfig {
            missed_heartbeats_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let config = TransportConfig::default()
            .with_reconnect(Duration::from_secs(10), Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TransportConfig = serde_json::from_str(r#"{"heartbeat_interval_ms": 250}"#).unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(250));
        assert_eq!(config.missed_heartbeats_threshold, 3);
    }
}
