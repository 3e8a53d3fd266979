//! Per-node bypass connections

use std::sync::Arc;

use super::{ApiClient, HttpApiClient};
use crate::config::{EndpointConfig, EndpointKind};
use crate::error::ClusterscopeResult;
use crate::patterns::RetryPolicy;

/// Builds a client that talks to one node directly, skipping cluster routing
///
/// The returned client is untested; callers connection-test it before use.
pub trait DirectConnector: Send + Sync {
    fn connect(
        &self,
        endpoint: &EndpointConfig,
        node_ip: &str,
    ) -> ClusterscopeResult<Arc<dyn ApiClient>>;
}

/// Production connector backed by [`HttpApiClient`]
pub struct HttpDirectConnector {
    retry: RetryPolicy,
}

impl HttpDirectConnector {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

impl Default for HttpDirectConnector {
    fn default() -> Self {
        // Connection tests race a short timer, retries would only blur that
        Self::new(RetryPolicy::none())
    }
}

impl DirectConnector for HttpDirectConnector {
    fn connect(
        &self,
        endpoint: &EndpointConfig,
        node_ip: &str,
    ) -> ClusterscopeResult<Arc<dyn ApiClient>> {
        let client =
            HttpApiClient::for_host(endpoint, EndpointKind::Pve, self.retry.clone(), node_ip)?;
        Ok(Arc::new(client))
    }
}
