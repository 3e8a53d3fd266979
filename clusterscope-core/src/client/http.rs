//! reqwest-backed API client

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::ApiClient;
use crate::config::{EndpointConfig, EndpointKind};
use crate::error::{ClusterscopeError, ClusterscopeResult};
use crate::patterns::{retry, RetryPolicy};

const API_ROOT: &str = "/api2/json";

/// Token-authenticated JSON client for one endpoint (or one node of it)
pub struct HttpApiClient {
    http: reqwest::Client,
    endpoint_id: String,
    base_url: String,
    auth_header: String,
    retry: RetryPolicy,
}

impl HttpApiClient {
    pub fn new(
        config: &EndpointConfig,
        kind: EndpointKind,
        retry: RetryPolicy,
    ) -> ClusterscopeResult<Self> {
        let url = Url::parse(&config.host)?;
        Self::build(config, kind, retry, url)
    }

    /// A client that talks to `host` directly, reusing the endpoint's
    /// scheme, port and credentials
    pub fn for_host(
        config: &EndpointConfig,
        kind: EndpointKind,
        retry: RetryPolicy,
        host: &str,
    ) -> ClusterscopeResult<Self> {
        let mut url = Url::parse(&config.host)?;
        url.set_host(Some(host))?;
        Self::build(config, kind, retry, url)
    }

    fn build(
        config: &EndpointConfig,
        kind: EndpointKind,
        retry: RetryPolicy,
        url: Url,
    ) -> ClusterscopeResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.allow_self_signed_certs)
            .build()
            .map_err(|e| ClusterscopeError::configuration(format!("endpoint {}", config.id), e.to_string()))?;

        let auth_header = match kind {
            EndpointKind::Pve => format!("PVEAPIToken={}={}", config.token_id, config.token_secret),
            EndpointKind::Pbs => format!("PBSAPIToken={}:{}", config.token_id, config.token_secret),
        };

        let base_url = url.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            http,
            endpoint_id: config.id.clone(),
            base_url,
            auth_header,
            retry,
        })
    }

    async fn get_once(&self, url: &str, path: &str) -> ClusterscopeResult<Value> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ClusterscopeError::Authorization {
                endpoint: self.endpoint_id.clone(),
                message: format!("HTTP {} on {}", status.as_u16(), path),
            });
        }
        if !status.is_success() {
            return Err(ClusterscopeError::HttpStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let body: Value = response.json().await?;

        match body {
            Value::Object(mut map) => Ok(map.remove("data").unwrap_or(Value::Null)),
            _ => Err(ClusterscopeError::unexpected_shape(path, "object with data member")),
        }
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, timeout: Duration) -> ClusterscopeResult<Value> {
        debug!(endpoint = %self.endpoint_id, path, "GET");
        let url = format!("{}{}{}", self.base_url, API_ROOT, path);

        // The timeout bounds every attempt and backoff together
        tokio::time::timeout(timeout, retry(&self.retry, path, || self.get_once(&url, path)))
            .await
            .map_err(|_| ClusterscopeError::timeout(format!("GET {}", url), timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig {
            id: "pve-a".to_string(),
            name: "Main".to_string(),
            host: "https://10.0.0.1:8006/".to_string(),
            token_id: "root@pam!monitor".to_string(),
            token_secret: "abc".to_string(),
            allow_self_signed_certs: true,
            node_name: None,
            namespace: None,
        }
    }

    #[test]
    fn test_auth_header_per_kind() {
        let pve = HttpApiClient::new(&endpoint(), EndpointKind::Pve, RetryPolicy::none()).unwrap();
        assert_eq!(pve.auth_header, "PVEAPIToken=root@pam!monitor=abc");
        assert_eq!(pve.base_url(), "https://10.0.0.1:8006");

        let pbs = HttpApiClient::new(&endpoint(), EndpointKind::Pbs, RetryPolicy::none()).unwrap();
        assert_eq!(pbs.auth_header, "PBSAPIToken=root@pam!monitor:abc");
    }

    #[test]
    fn test_direct_host_keeps_port_and_scheme() {
        let client =
            HttpApiClient::for_host(&endpoint(), EndpointKind::Pve, RetryPolicy::none(), "10.0.0.7")
                .unwrap();
        assert_eq!(client.base_url(), "https://10.0.0.7:8006");
    }

    #[tokio::test]
    async fn test_timeout_covers_all_attempts() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = endpoint();
        config.host = format!("http://{}", addr);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let client = HttpApiClient::new(&config, EndpointKind::Pve, policy).unwrap();

        let timeout = Duration::from_millis(300);
        let started = std::time::Instant::now();
        let err = client.get("/cluster/status", timeout).await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.kind(), crate::error::ErrorKind::Transient);
        assert!(elapsed < timeout * 2, "took {:?}", elapsed);
        server.abort();
    }
}
