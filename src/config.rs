//! Reader configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 128_000;
const DEFAULT_LOW_RDY_IDLE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_LOW_RDY_REBALANCE_MS: u64 = 1_500;

/// Configuration error raised at reader construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_in_flight must be at least 1")]
    ZeroMaxInFlight,

    #[error("{field} must be nonzero")]
    ZeroDuration { field: &'static str },
}

/// Tunables for one consumer's flow-control core.
///
/// Durations are stored as milliseconds so the struct round-trips through
/// plain config files without custom serde glue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Global cap on simultaneous in-flight messages across all connections.
    pub max_in_flight: u64,

    /// Interval after the first failure; doubles on each consecutive failure.
    pub backoff_base_ms: u64,

    /// Ceiling for the backoff interval.
    pub max_backoff_ms: u64,

    /// How long a low-RDY connection may hold credit without receiving a
    /// message before it is asked to surrender it.
    pub low_rdy_idle_timeout_ms: u64,

    /// Period of the safety-net rebalance while in the low-RDY regime.
    pub low_rdy_rebalance_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            low_rdy_idle_timeout_ms: DEFAULT_LOW_RDY_IDLE_TIMEOUT_MS,
            low_rdy_rebalance_ms: DEFAULT_LOW_RDY_REBALANCE_MS,
        }
    }
}

impl ReaderConfig {
    /// Convenience constructor for the common case.
    pub fn with_max_in_flight(max_in_flight: u64) -> Self {
        Self {
            max_in_flight,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::ZeroMaxInFlight);
        }
        for (field, value) in [
            ("backoff_base_ms", self.backoff_base_ms),
            ("max_backoff_ms", self.max_backoff_ms),
            ("low_rdy_idle_timeout_ms", self.low_rdy_idle_timeout_ms),
            ("low_rdy_rebalance_ms", self.low_rdy_rebalance_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        Ok(())
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn low_rdy_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.low_rdy_idle_timeout_ms)
    }

    pub fn low_rdy_rebalance(&self) -> Duration {
        Duration::from_millis(self.low_rdy_rebalance_ms)
    }
}
