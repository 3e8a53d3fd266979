//! Default configuration values for Clusterscope
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Discovery defaults
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RESOURCE_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_CONNECTION_TEST_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_NODE_FETCH_CONCURRENCY: usize = 5;
pub const DEFAULT_METRICS_CONCURRENCY: usize = 10;
pub const DEFAULT_TRANSITION_WINDOW: Duration = Duration::from_secs(5 * 60);

// Cache defaults
pub const DEFAULT_DIRECT_CONNECTION_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MEMBERSHIP_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_GUEST_AGENT_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_GUEST_AGENT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_GUEST_AGENT_IDLE_EXPIRY: Duration = Duration::from_secs(30 * 60);

// Backup defaults
pub const DEFAULT_RETENTION_DAYS: u32 = 365;
pub const DEFAULT_VERIFICATION_LOOKBACK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_PBS_TASK_LIMIT: u32 = 1000;
pub const DEFAULT_PVE_TASK_LIMIT: u32 = 200;
pub const DEFAULT_RECENT_TASK_COUNT: usize = 50;

// Retry defaults
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

// Observability defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "pretty";
