//! Namespace selection per datastore

use async_trait::async_trait;
use std::time::Duration;

use crate::client::fields::str_field;
use crate::client::{get_list, ApiClient};
use crate::config::EndpointConfig;
use crate::observability::log_degraded;

/// Decides which namespaces of a datastore are queried
///
/// Implementations always include the root namespace `""`.
#[async_trait]
pub trait NamespaceDiscovery: Send + Sync {
    async fn namespaces_to_query(
        &self,
        client: &dyn ApiClient,
        datastore: &str,
        config: &EndpointConfig,
    ) -> Vec<String>;
}

/// Lists the datastore's namespaces, optionally narrowed to the endpoint's
/// configured namespace and its children
pub struct ApiNamespaceDiscovery {
    timeout: Duration,
}

impl ApiNamespaceDiscovery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl NamespaceDiscovery for ApiNamespaceDiscovery {
    async fn namespaces_to_query(
        &self,
        client: &dyn ApiClient,
        datastore: &str,
        config: &EndpointConfig,
    ) -> Vec<String> {
        let path = format!("/admin/datastore/{}/namespace", datastore);
        let listed = match get_list(client, &path, self.timeout).await {
            Ok(entries) => entries
                .iter()
                .filter_map(|entry| str_field(entry, "ns"))
                .map(str::to_string)
                .collect(),
            Err(e) => {
                log_degraded(&e, &config.id, &format!("namespaces of datastore {}", datastore));
                Vec::new()
            }
        };

        select_namespaces(listed, config.namespace.as_deref())
    }
}

/// Root first, then the listed namespaces matching `filter`, without duplicates
pub fn select_namespaces(listed: Vec<String>, filter: Option<&str>) -> Vec<String> {
    let filter = filter.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty());

    let mut selected = vec![String::new()];
    for ns in listed {
        let keep = match filter {
            Some(filter) => ns == filter || ns.starts_with(&format!("{}/", filter)),
            None => true,
        };
        if keep && !selected.contains(&ns) {
            selected.push(ns);
        }
    }
    selected
}
