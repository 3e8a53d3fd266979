//! Cache lifetimes

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for direct node connections; also used for last-known-good node state
    #[serde(with = "humantime_serde")]
    pub direct_connection_ttl: Duration,

    /// TTL for cluster/standalone classifications
    #[serde(with = "humantime_serde")]
    pub membership_ttl: Duration,

    /// Background sweep interval
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Guest-agent circuit breaker base retry delay
    #[serde(with = "humantime_serde")]
    pub guest_agent_retry_delay: Duration,

    /// Failures after which the breaker uses the extended (3x) window
    pub guest_agent_max_retries: u32,

    /// Untouched breaker entries are dropped after this long
    #[serde(with = "humantime_serde")]
    pub guest_agent_idle_expiry: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            direct_connection_ttl: DEFAULT_DIRECT_CONNECTION_TTL,
            membership_ttl: DEFAULT_MEMBERSHIP_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            guest_agent_retry_delay: DEFAULT_GUEST_AGENT_RETRY_DELAY,
            guest_agent_max_retries: DEFAULT_GUEST_AGENT_MAX_RETRIES,
            guest_agent_idle_expiry: DEFAULT_GUEST_AGENT_IDLE_EXPIRY,
        }
    }
}
