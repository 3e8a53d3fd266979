// Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clusterscope_core::client::{ApiClient, DirectConnector, EndpointPool};
use clusterscope_core::config::{Config, EndpointConfig};
use clusterscope_core::error::{ClusterscopeError, ClusterscopeResult};

/// Scripted outcome for one path
#[derive(Debug, Clone)]
pub enum Reply {
    Data(Value),
    ConnectionRefused,
    Forbidden,
}

/// API client answering from a script and recording every call
///
/// Unscripted paths answer HTTP 404.
pub struct MockApiClient {
    base_url: String,
    routes: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
}

impl MockApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, path: &str, data: Value) -> Self {
        self.set(path, Reply::Data(data));
        self
    }

    pub fn refuse(self, path: &str) -> Self {
        self.set(path, Reply::ConnectionRefused);
        self
    }

    pub fn forbid(self, path: &str) -> Self {
        self.set(path, Reply::Forbidden);
        self
    }

    /// Replace the script for `path` on a shared client
    pub fn set(&self, path: &str, reply: Reply) {
        self.routes.lock().unwrap().insert(path.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any recorded call starts with `prefix`
    pub fn called_with_prefix(&self, prefix: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c.starts_with(prefix))
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == path).count()
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, _timeout: Duration) -> ClusterscopeResult<Value> {
        self.calls.lock().unwrap().push(path.to_string());
        let reply = self.routes.lock().unwrap().get(path).cloned();
        match reply {
            Some(Reply::Data(data)) => Ok(data),
            Some(Reply::ConnectionRefused) => Err(ClusterscopeError::connection(&self.base_url, "connection refused")),
            Some(Reply::Forbidden) => Err(ClusterscopeError::Authorization {
                endpoint: self.base_url.clone(),
                message: "permission check failed".to_string(),
            }),
            None => Err(ClusterscopeError::HttpStatus {
                status: 404,
                path: path.to_string(),
            }),
        }
    }
}

/// Connector for tests where nodes are never reachable directly
pub struct NoDirectConnector;

impl DirectConnector for NoDirectConnector {
    fn connect(&self, _endpoint: &EndpointConfig, node_ip: &str) -> ClusterscopeResult<Arc<dyn ApiClient>> {
        Err(ClusterscopeError::connection(node_ip, "direct connections disabled in tests"))
    }
}

pub fn endpoint(id: &str, name: &str) -> EndpointConfig {
    EndpointConfig {
        id: id.to_string(),
        name: name.to_string(),
        host: format!("https://{}.test:8006", id),
        token_id: "root@pam!test".to_string(),
        token_secret: "secret".to_string(),
        allow_self_signed_certs: true,
        node_name: None,
        namespace: None,
    }
}

/// Pool over scripted clients; the ids of `pve` and `pbs` become endpoint ids
pub fn pool(pve: &[(&str, &Arc<MockApiClient>)], pbs: &[(&str, &Arc<MockApiClient>)]) -> Arc<EndpointPool> {
    let mut pool = EndpointPool::new();
    for &(id, client) in pve {
        pool.add_pve(endpoint(id, id), Arc::clone(client) as Arc<dyn ApiClient>);
    }
    for &(id, client) in pbs {
        pool.add_pbs(endpoint(id, id), Arc::clone(client) as Arc<dyn ApiClient>);
    }
    Arc::new(pool)
}

/// Defaults with short timeouts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.discovery.discovery_timeout = Duration::from_millis(200);
    config.discovery.resource_timeout = Duration::from_millis(200);
    config.discovery.connection_test_timeout = Duration::from_millis(100);
    config
}

/// Current unix time in seconds, for archive payloads inside retention
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
