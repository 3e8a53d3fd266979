//! Configuration management with TOML support
//!
//! This module provides a structured configuration system that:
//! - Loads from TOML files
//! - Supports environment variable overrides
//! - Validates configuration values

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{ClusterscopeError, ClusterscopeResult};
use crate::patterns::RetryPolicy;

pub mod backup;
pub mod cache;
pub mod defaults;
pub mod discovery;
pub mod endpoints;
pub mod observability;

pub use backup::BackupConfig;
pub use cache::CacheConfig;
pub use defaults::*;
pub use discovery::DiscoveryConfig;
pub use endpoints::{EndpointConfig, EndpointKind, EndpointsConfig};
pub use observability::{LoggingConfig, ObservabilityConfig};

/// Complete configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discovery cycle timeouts and fan-out limits
    pub discovery: DiscoveryConfig,

    /// Cache lifetimes
    pub cache: CacheConfig,

    /// Backup aggregation settings
    pub backup: BackupConfig,

    /// Retry policy applied to every outbound API call
    pub retry: RetryPolicy,

    /// Logging configuration
    pub observability: ObservabilityConfig,

    /// Configured endpoints
    pub endpoints: EndpointsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClusterscopeResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            ClusterscopeError::configuration(
                "config",
                format!("Failed to read config file {}: {}", path.as_ref().display(), e),
            )
        })?;

        let mut config = Self::from_toml_str(&contents)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string without env overrides or validation
    pub fn from_toml_str(contents: &str) -> ClusterscopeResult<Self> {
        toml::from_str(contents).map_err(|e| {
            ClusterscopeError::configuration("config", format!("Failed to parse TOML: {}", e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CLUSTERSCOPE_LOG_LEVEL") {
            self.observability.logging.level = level;
        }
        if let Ok(interval) = std::env::var("CLUSTERSCOPE_CYCLE_INTERVAL") {
            if let Ok(interval) = humantime_serde::re::humantime::parse_duration(&interval) {
                self.discovery.cycle_interval = interval;
            }
        }
        if let Ok(days) = std::env::var("CLUSTERSCOPE_RETENTION_DAYS") {
            if let Ok(days) = days.parse() {
                self.backup.retention_days = days;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ClusterscopeResult<()> {
        if self.discovery.node_fetch_concurrency == 0 {
            return Err(ClusterscopeError::configuration(
                "discovery.node_fetch_concurrency",
                "must be at least 1",
            ));
        }
        if self.discovery.metrics_concurrency == 0 {
            return Err(ClusterscopeError::configuration(
                "discovery.metrics_concurrency",
                "must be at least 1",
            ));
        }
        let durations = [
            ("discovery.cycle_interval", self.discovery.cycle_interval),
            ("discovery.discovery_timeout", self.discovery.discovery_timeout),
            ("discovery.resource_timeout", self.discovery.resource_timeout),
            ("discovery.connection_test_timeout", self.discovery.connection_test_timeout),
            ("cache.direct_connection_ttl", self.cache.direct_connection_ttl),
            ("cache.membership_ttl", self.cache.membership_ttl),
            ("cache.sweep_interval", self.cache.sweep_interval),
            ("cache.guest_agent_retry_delay", self.cache.guest_agent_retry_delay),
            ("cache.guest_agent_idle_expiry", self.cache.guest_agent_idle_expiry),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ClusterscopeError::configuration(*field, "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ClusterscopeError::configuration(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }

        match self.observability.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ClusterscopeError::configuration(
                    "observability.logging.level",
                    format!("Invalid log level: {}", other),
                ))
            }
        }

        let mut seen = HashSet::new();
        for (section, endpoint) in self
            .endpoints
            .pve
            .iter()
            .map(|e| ("endpoints.pve", e))
            .chain(self.endpoints.pbs.iter().map(|e| ("endpoints.pbs", e)))
        {
            if endpoint.id.trim().is_empty() {
                return Err(ClusterscopeError::configuration(section, "endpoint id cannot be empty"));
            }
            if !seen.insert(endpoint.id.as_str()) {
                return Err(ClusterscopeError::configuration(
                    section,
                    format!("duplicate endpoint id: {}", endpoint.id),
                ));
            }
            if !(endpoint.host.starts_with("https://") || endpoint.host.starts_with("http://")) {
                return Err(ClusterscopeError::configuration(
                    section,
                    format!("host for {} must start with http:// or https://", endpoint.id),
                ));
            }
        }

        Ok(())
    }
}
