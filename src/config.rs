//! Session configuration.
//!
//! Deserializable from any serde format; missing keys take the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BAUD_RATE, DEFAULT_DEVICE_ADDRESS, DEFAULT_HOST_ADDRESS, FAILOVER_THRESHOLD, RETRIES,
    TIMEOUT_MS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Source address stamped on requests
    pub host_address: u8,
    /// Destination used by the command methods
    pub device_address: u8,
    /// Reply deadline per attempt
    pub timeout_ms: u64,
    /// Retransmissions after the first attempt
    pub retries: u32,
    /// Consecutive failures before switching links
    pub failover_threshold: u32,
    /// Pause before each retransmission
    pub retry_delay_ms: u64,
    /// Upper bound of a random extra pause, spreading retries on a shared bus
    pub retry_jitter_ms: u64,
    pub baud_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host_address: DEFAULT_HOST_ADDRESS,
            device_address: DEFAULT_DEVICE_ADDRESS,
            timeout_ms: TIMEOUT_MS,
            retries: RETRIES,
            failover_threshold: FAILOVER_THRESHOLD,
            retry_delay_ms: 0,
            retry_jitter_ms: 0,
            baud_rate: BAUD_RATE,
        }
    }
}

impl SessionConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.failover_threshold, 3);
        assert_eq!(config.timeout(), Duration::from_millis(10));
        assert_eq!(config.baud_rate, 460_800);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "device_address": 2, "retries": 5 }"#).unwrap();
        assert_eq!(config.device_address, 2);
        assert_eq!(config.retries, 5);
        assert_eq!(config.host_address, 0x11);
        assert_eq!(config.timeout_ms, 10);
    }
}
