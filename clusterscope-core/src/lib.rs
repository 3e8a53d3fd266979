//! Discovery, failover and reconciliation engine for hypervisor clusters and
//! backup archive servers.
//!
//! One [`engine::DiscoveryEngine::run_cycle`] call produces a deduplicated
//! snapshot of nodes, guests, storage, backups and guest metrics across every
//! configured endpoint, tolerating slow, redundant and partially reachable
//! endpoints along the way.

pub mod backup;
pub mod caching;
pub mod client;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod patterns;
pub mod reconciliation;
pub mod topology;
pub mod types;

pub use engine::{CycleStats, DiscoveryEngine, DiscoveryResult};
pub use error::{ClusterscopeError, ClusterscopeResult, ErrorKind};
