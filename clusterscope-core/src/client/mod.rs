//! Outbound API access
//!
//! Every remote call in the engine goes through [`ApiClient`], which hides the
//! transport and the `{"data": ...}` response envelope. The production
//! implementation is [`HttpApiClient`]; tests script their own.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, EndpointConfig, EndpointKind};
use crate::error::{ClusterscopeError, ClusterscopeResult};

pub mod connector;
pub mod fields;
pub mod http;

pub use connector::{DirectConnector, HttpDirectConnector};
pub use http::HttpApiClient;

/// A handle on one remote API with base URL and authentication applied
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Where this client points, for log messages
    fn base_url(&self) -> &str;

    /// GET `path` (relative to the API root, may carry a query string) and
    /// return the `data` member of the response
    async fn get(&self, path: &str, timeout: Duration) -> ClusterscopeResult<Value>;
}

/// GET a path whose `data` must be a JSON array
pub async fn get_list(
    client: &dyn ApiClient,
    path: &str,
    timeout: Duration,
) -> ClusterscopeResult<Vec<Value>> {
    match client.get(path, timeout).await? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        _ => Err(ClusterscopeError::unexpected_shape(path, "array")),
    }
}

/// A configured endpoint and the client used to reach it
#[derive(Clone)]
pub struct EndpointHandle {
    pub config: EndpointConfig,
    pub client: Arc<dyn ApiClient>,
}

impl std::fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("id", &self.config.id)
            .field("base_url", &self.client.base_url())
            .finish()
    }
}

/// All configured endpoints of both kinds, keyed by endpoint id
#[derive(Debug, Clone, Default)]
pub struct EndpointPool {
    pve: BTreeMap<String, EndpointHandle>,
    pbs: BTreeMap<String, EndpointHandle>,
}

impl EndpointPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP clients for every configured endpoint
    pub fn from_config(config: &Config) -> ClusterscopeResult<Self> {
        let mut pool = Self::new();
        for endpoint in &config.endpoints.pve {
            let client = HttpApiClient::new(endpoint, EndpointKind::Pve, config.retry.clone())?;
            pool.add_pve(endpoint.clone(), Arc::new(client));
        }
        for endpoint in &config.endpoints.pbs {
            let client = HttpApiClient::new(endpoint, EndpointKind::Pbs, config.retry.clone())?;
            pool.add_pbs(endpoint.clone(), Arc::new(client));
        }
        Ok(pool)
    }

    pub fn add_pve(&mut self, config: EndpointConfig, client: Arc<dyn ApiClient>) {
        self.pve
            .insert(config.id.clone(), EndpointHandle { config, client });
    }

    pub fn add_pbs(&mut self, config: EndpointConfig, client: Arc<dyn ApiClient>) {
        self.pbs
            .insert(config.id.clone(), EndpointHandle { config, client });
    }

    pub fn pve(&self, endpoint_id: &str) -> Option<&EndpointHandle> {
        self.pve.get(endpoint_id)
    }

    pub fn pbs(&self, endpoint_id: &str) -> Option<&EndpointHandle> {
        self.pbs.get(endpoint_id)
    }

    pub fn pve_endpoints(&self) -> impl Iterator<Item = &EndpointHandle> {
        self.pve.values()
    }

    pub fn pbs_endpoints(&self) -> impl Iterator<Item = &EndpointHandle> {
        self.pbs.values()
    }

    pub fn is_empty(&self) -> bool {
        self.pve.is_empty() && self.pbs.is_empty()
    }
}
