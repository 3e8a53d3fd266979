//! Discovery cycle configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;

/// Timeouts and fan-out limits for a discovery cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How often the CLI triggers a discovery cycle
    #[serde(with = "humantime_serde")]
    pub cycle_interval: Duration,

    /// Timeout for cluster-status and node-list calls
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,

    /// Timeout for per-node and per-guest resource calls
    #[serde(with = "humantime_serde")]
    pub resource_timeout: Duration,

    /// Race timeout used when testing a direct node connection
    #[serde(with = "humantime_serde")]
    pub connection_test_timeout: Duration,

    /// Simultaneous in-flight node fetches per endpoint group
    pub node_fetch_concurrency: usize,

    /// Simultaneous in-flight guest metric fetches per endpoint
    pub metrics_concurrency: usize,

    /// How long an online node may be held online against conflicting
    /// offline readings before the offline reading wins
    #[serde(with = "humantime_serde")]
    pub transition_window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            resource_timeout: DEFAULT_RESOURCE_TIMEOUT,
            connection_test_timeout: DEFAULT_CONNECTION_TEST_TIMEOUT,
            node_fetch_concurrency: DEFAULT_NODE_FETCH_CONCURRENCY,
            metrics_concurrency: DEFAULT_METRICS_CONCURRENCY,
            transition_window: DEFAULT_TRANSITION_WINDOW,
        }
    }
}
