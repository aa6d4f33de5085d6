// Protocol configuration - timing and size knobs for one node

use crate::constants::{
    BROADCAST_INTERVAL_MS, MAX_NUMBER_OF_RREQ_RETRIES, MAX_USER_DATA_SIZE, PATH_DISCOVERY_TIME_MS,
    ROUTE_ALIVE_TIME_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("max_payload_size {size} exceeds frame capacity {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Tunables shared by every task of a node.
///
/// Defaults match the classic AODV constants used on the wire by other
/// implementations; tests usually shorten them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Lifetime of a forward route since it was last used or refreshed.
    pub route_alive_time_ms: u64,
    /// Lifetime of a route request entry (duplicate window and retry timer).
    pub path_discovery_time_ms: u64,
    /// Period of hello broadcasts.
    pub hello_interval_ms: u64,
    /// Total RREQ broadcasts before a discovery is given up.
    pub max_rreq_retries: u32,
    /// Largest accepted application payload in bytes.
    pub max_payload_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            route_alive_time_ms: ROUTE_ALIVE_TIME_MS,
            path_discovery_time_ms: PATH_DISCOVERY_TIME_MS,
            hello_interval_ms: BROADCAST_INTERVAL_MS,
            max_rreq_retries: MAX_NUMBER_OF_RREQ_RETRIES,
            max_payload_size: MAX_USER_DATA_SIZE,
        }
    }
}

impl ProtocolConfig {
    pub fn route_alive_time(&self) -> Duration {
        Duration::from_millis(self.route_alive_time_ms)
    }

    pub fn path_discovery_time(&self) -> Duration {
        Duration::from_millis(self.path_discovery_time_ms)
    }

    pub fn hello_interval(&self) -> Duration {
        Duration::from_millis(self.hello_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.route_alive_time_ms == 0 {
            return Err(ConfigError::ZeroValue("route_alive_time_ms"));
        }
        if self.path_discovery_time_ms == 0 {
            return Err(ConfigError::ZeroValue("path_discovery_time_ms"));
        }
        if self.hello_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("hello_interval_ms"));
        }
        if self.max_rreq_retries == 0 {
            return Err(ConfigError::ZeroValue("max_rreq_retries"));
        }
        if self.max_payload_size > MAX_USER_DATA_SIZE {
            return Err(ConfigError::PayloadTooLarge {
                size: self.max_payload_size,
                max: MAX_USER_DATA_SIZE,
            });
        }
        Ok(())
    }
}
