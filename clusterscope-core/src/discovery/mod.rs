//! Hypervisor discovery orchestration
//!
//! For one endpoint group the orchestrator walks the failover order until an
//! endpoint answers with data, then fans out per-node queries through a
//! [`BoundedExecutor`]. Failures degrade individual values to their defaults;
//! nothing here returns an error past the group boundary.
//!
//! Nodes that cluster status reports offline are never queried, so one dead
//! host does not cost a timeout per resource call.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument, Span};

use crate::caching::DirectConnectionCache;
use crate::client::fields::str_field;
use crate::client::{get_list, ApiClient, DirectConnector, EndpointHandle, EndpointPool};
use crate::config::DiscoveryConfig;
use crate::error::ClusterscopeResult;
use crate::observability::{group_span, log_degraded};
use crate::patterns::{partition_results, BoundedExecutor};
use crate::types::{EndpointGroup, GroupDiscovery, Guest, GuestType, Node, NodeStatus};

pub mod backups;
pub mod parse;

use parse::{apply_node_status, cluster_node_map, guest_from_entry, node_from_listing, storage_from_entry};

/// Everything learned about one online node
#[derive(Debug, Clone)]
struct NodeFetch {
    node: Node,
    vms: Vec<Guest>,
    containers: Vec<Guest>,
}

pub struct DiscoveryOrchestrator {
    pool: Arc<EndpointPool>,
    direct_connections: Arc<DirectConnectionCache>,
    connector: Arc<dyn DirectConnector>,
    config: DiscoveryConfig,
}

impl DiscoveryOrchestrator {
    pub fn new(
        pool: Arc<EndpointPool>,
        direct_connections: Arc<DirectConnectionCache>,
        connector: Arc<dyn DirectConnector>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            pool,
            direct_connections,
            connector,
            config,
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// Discover a group from the first endpoint, in failover order, that
    /// answers with at least one node or guest
    ///
    /// Returns an empty result (no `source_endpoint`) when every endpoint
    /// fails.
    pub async fn fetch_from_endpoint_group(&self, group: &EndpointGroup) -> GroupDiscovery {
        let span = group_span(&group.cluster_id);

        async move {
            for endpoint_id in group.failover_order() {
                let Some(handle) = self.pool.pve(endpoint_id) else {
                    warn!(endpoint = %endpoint_id, "Endpoint in group is not configured");
                    continue;
                };

                match self.discover_endpoint(handle, group).await {
                    Ok(discovery) if discovery.has_data() => {
                        Span::current().record("source", endpoint_id);
                        info!(
                            endpoint = %endpoint_id,
                            nodes = discovery.nodes.len(),
                            vms = discovery.vms.len(),
                            containers = discovery.containers.len(),
                            "Endpoint group served"
                        );
                        return discovery;
                    }
                    Ok(_) => {
                        warn!(endpoint = %endpoint_id, "Endpoint returned no nodes or guests, trying next");
                    }
                    Err(e) => {
                        log_degraded(&e, endpoint_id, "node list");
                    }
                }
            }

            warn!("No endpoint in group returned data");
            GroupDiscovery::default()
        }
        .instrument(span)
        .await
    }

    async fn discover_endpoint(
        &self,
        handle: &EndpointHandle,
        group: &EndpointGroup,
    ) -> ClusterscopeResult<GroupDiscovery> {
        let endpoint_id = handle.config.id.as_str();
        let client = handle.client.as_ref();
        let timeout = self.config.discovery_timeout;

        let (cluster_status, node_list) = tokio::join!(
            get_list(client, "/cluster/status", timeout),
            get_list(client, "/nodes", timeout),
        );

        let node_list = node_list?;
        let cluster_nodes = match cluster_status {
            Ok(entries) => cluster_node_map(&entries),
            Err(e) => {
                log_degraded(&e, endpoint_id, "cluster status");
                HashMap::new()
            }
        };

        let is_cluster = group.is_cluster();
        let mut offline = Vec::new();
        let mut online = Vec::new();

        for entry in &node_list {
            let Some(name) = str_field(entry, "node") else {
                continue;
            };
            let display_name = handle.config.node_display_name(name, is_cluster);
            let Some(mut node) = node_from_listing(entry, endpoint_id, display_name) else {
                continue;
            };

            let info = cluster_nodes.get(name).cloned().unwrap_or_default();
            node.ip = info.ip;
            node.is_cluster_member = is_cluster;
            node.cluster_name = is_cluster.then(|| group.cluster_id.clone());

            let reported_offline = match info.online {
                Some(is_online) => !is_online,
                None => node.status == NodeStatus::Offline,
            };

            if reported_offline {
                debug!(endpoint = %endpoint_id, node = %name, "Node reported offline, skipping queries");
                let mut skipped = Node::offline(endpoint_id, name, node.display_name);
                skipped.ip = node.ip;
                skipped.is_cluster_member = node.is_cluster_member;
                skipped.cluster_name = node.cluster_name;
                offline.push(skipped);
            } else {
                if info.online == Some(true) {
                    node.status = NodeStatus::Online;
                }
                online.push(node);
            }
        }

        let executor = BoundedExecutor::new(self.config.node_fetch_concurrency);
        let results = executor
            .run_all(online, |node| self.fetch_node(handle, node))
            .await;
        let (fetched, errors) = partition_results(results);
        for e in &errors {
            log_degraded(e, endpoint_id, "node resources");
        }

        let mut discovery = GroupDiscovery {
            source_endpoint: Some(endpoint_id.to_string()),
            ..Default::default()
        };
        for fetch in fetched {
            discovery.nodes.push(fetch.node);
            discovery.vms.extend(fetch.vms);
            discovery.containers.extend(fetch.containers);
        }
        discovery.nodes.extend(offline);
        discovery.nodes.sort_by(|a, b| a.node.cmp(&b.node));

        Ok(discovery)
    }

    /// Query status, storage, VMs and containers of one node concurrently
    async fn fetch_node(&self, handle: &EndpointHandle, mut node: Node) -> ClusterscopeResult<NodeFetch> {
        let endpoint_id = handle.config.id.as_str();
        let client = handle.client.as_ref();
        let timeout = self.config.resource_timeout;
        let name = node.node.clone();

        let status_path = format!("/nodes/{}/status", name);
        let storage_path = format!("/nodes/{}/storage", name);
        let qemu_path = format!("/nodes/{}/qemu", name);
        let lxc_path = format!("/nodes/{}/lxc", name);

        let (status, storage, qemu, lxc) = tokio::join!(
            client.get(&status_path, timeout),
            get_list(client, &storage_path, timeout),
            get_list(client, &qemu_path, timeout),
            get_list(client, &lxc_path, timeout),
        );

        match status {
            Ok(status) => apply_node_status(&mut node, &status),
            Err(e) => log_degraded(&e, endpoint_id, &format!("status of node {}", name)),
        }

        node.storage = degrade(storage, endpoint_id, &format!("storage of node {}", name))
            .iter()
            .filter_map(storage_from_entry)
            .collect();

        let vms = guests(
            degrade(qemu, endpoint_id, &format!("VMs of node {}", name)),
            endpoint_id,
            &name,
            GuestType::Qemu,
        );
        let containers = guests(
            degrade(lxc, endpoint_id, &format!("containers of node {}", name)),
            endpoint_id,
            &name,
            GuestType::Lxc,
        );

        Ok(NodeFetch {
            node,
            vms,
            containers,
        })
    }

    /// A connection-tested client talking to `node` directly
    ///
    /// Reuses a cached connection when present. A fresh connection must answer
    /// `/version` within the connection-test timeout; failures are not cached.
    pub async fn direct_client(
        &self,
        handle: &EndpointHandle,
        node: &str,
        ip: Option<&str>,
    ) -> Option<Arc<dyn ApiClient>> {
        let endpoint_id = handle.config.id.as_str();
        if let Some(client) = self.direct_connections.get(node, endpoint_id) {
            return Some(client);
        }

        let ip = ip?;
        let client = match self.connector.connect(&handle.config, ip) {
            Ok(client) => client,
            Err(e) => {
                debug!(endpoint = %endpoint_id, node = %node, error = %e, "Cannot build direct connection");
                return None;
            }
        };

        let test_timeout = self.config.connection_test_timeout;
        match tokio::time::timeout(test_timeout, client.get("/version", test_timeout)).await {
            Ok(Ok(_)) => {
                debug!(endpoint = %endpoint_id, node = %node, ip = %ip, "Direct connection established");
                self.direct_connections.insert(node, endpoint_id, Arc::clone(&client));
                Some(client)
            }
            Ok(Err(e)) => {
                debug!(endpoint = %endpoint_id, node = %node, error = %e, "Direct connection test failed");
                None
            }
            Err(_) => {
                debug!(endpoint = %endpoint_id, node = %node, "Direct connection test timed out");
                None
            }
        }
    }
}

fn degrade(result: ClusterscopeResult<Vec<Value>>, endpoint_id: &str, what: &str) -> Vec<Value> {
    result.unwrap_or_else(|e| {
        log_degraded(&e, endpoint_id, what);
        Vec::new()
    })
}

fn guests(entries: Vec<Value>, endpoint_id: &str, node: &str, guest_type: GuestType) -> Vec<Guest> {
    entries
        .iter()
        .filter_map(|entry| guest_from_entry(entry, endpoint_id, node, guest_type))
        .collect()
}
