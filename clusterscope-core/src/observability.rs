//! Tracing setup and shared logging helpers
//!
//! Degraded values are logged, never propagated; how loudly depends on the
//! error's [`ErrorKind`]. Authorization failures point at operator-fixable
//! configuration and are logged at `error!`, everything else at `warn!`.

use tracing::{error, warn, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{ClusterscopeError, ClusterscopeResult, ErrorKind};

/// Initialize tracing from the logging configuration
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) -> ClusterscopeResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ClusterscopeError::configuration("observability.logging.level", e.to_string()))?;

    let registry = Registry::default().with(env_filter);

    let result = if config.format == "compact" {
        registry
            .with(fmt::layer().compact().with_target(config.with_target))
            .try_init()
    } else {
        registry
            .with(fmt::layer().pretty().with_target(config.with_target))
            .try_init()
    };

    result.map_err(|e| ClusterscopeError::internal(format!("Failed to install tracing subscriber: {}", e)))
}

/// Span covering one discovery cycle
#[inline]
pub fn cycle_span(cycle: u64) -> Span {
    tracing::info_span!(
        "discovery_cycle",
        cycle = cycle,
        duration_ms = tracing::field::Empty,
    )
}

/// Span covering one endpoint group fetch
#[inline]
pub fn group_span(cluster_id: &str) -> Span {
    tracing::info_span!(
        "endpoint_group",
        cluster = %cluster_id,
        source = tracing::field::Empty,
    )
}

/// Span covering one archive-server instance
#[inline]
pub fn archive_span(endpoint_id: &str) -> Span {
    tracing::info_span!("archive_instance", endpoint = %endpoint_id)
}

/// Log a value that degraded to its default because of `err`
pub fn log_degraded(err: &ClusterscopeError, endpoint_id: &str, what: &str) {
    match err.kind() {
        ErrorKind::Authorization => error!(
            endpoint = %endpoint_id,
            error = %err,
            "Permission denied fetching {}; check the API token's privileges",
            what
        ),
        _ => warn!(endpoint = %endpoint_id, error = %err, "Failed to fetch {}", what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_authorization_failures_logged_loudly() {
        let err = ClusterscopeError::Authorization {
            endpoint: "pve-a".to_string(),
            message: "HTTP 403 on /nodes/pve1/storage".to_string(),
        };
        log_degraded(&err, "pve-a", "storage for pve1");

        assert!(logs_contain("ERROR"));
        assert!(logs_contain("Permission denied fetching storage for pve1"));
    }

    #[traced_test]
    #[test]
    fn test_transient_failures_logged_as_warnings() {
        let err = ClusterscopeError::connection("10.0.0.1:8006", "connection refused");
        log_degraded(&err, "pve-a", "node list");

        assert!(logs_contain("WARN"));
        assert!(logs_contain("Failed to fetch node list"));
    }

    #[test]
    fn test_span_creation() {
        let _guard = group_span("prod").entered();
        tracing::info!("Test message in group span");
    }
}
