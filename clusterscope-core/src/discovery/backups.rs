//! Backup artefacts visible from the hypervisor side
//!
//! Collected from the endpoint that served a group: vzdump task history,
//! backup files on backup-capable storages, and guest snapshots. Storages of
//! type `pbs` are left to the archive-server aggregator.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::DiscoveryOrchestrator;
use crate::client::fields::{bool_field, i64_field, str_field, string_field, u64_field};
use crate::client::{get_list, ApiClient, EndpointHandle};
use crate::observability::log_degraded;
use crate::patterns::{partition_results, BoundedExecutor};
use crate::types::{
    Guest, GuestSnapshot, Node, PveBackupTask, PveBackups, StorageBackup, StorageInfo,
};

impl DiscoveryOrchestrator {
    /// Collect backup tasks, backup files and guest snapshots for the nodes
    /// and guests of a served group
    pub async fn collect_backups(
        &self,
        source_endpoint: Option<&str>,
        nodes: &[Node],
        guests: &[Guest],
        task_limit: usize,
    ) -> PveBackups {
        let Some(handle) = source_endpoint.and_then(|id| self.pool.pve(id)) else {
            return PveBackups::default();
        };

        let online: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.is_online() && !n.from_cache && n.endpoint_id == handle.config.id)
            .collect();

        let executor = BoundedExecutor::new(self.config.node_fetch_concurrency);
        let results = executor
            .run_all(online, |node| async move {
                let node_guests: Vec<&Guest> = guests
                    .iter()
                    .filter(|g| g.node == node.node && g.endpoint_id == handle.config.id && !g.template)
                    .collect();
                Ok(self.collect_node_backups(handle, node, &node_guests, task_limit).await)
            })
            .await;

        let (per_node, errors) = partition_results(results);
        for e in &errors {
            log_degraded(e, &handle.config.id, "node backups");
        }

        let mut backups = PveBackups::default();
        for node_backups in per_node {
            backups.extend(node_backups);
        }
        debug!(
            endpoint = %handle.config.id,
            tasks = backups.backup_tasks.len(),
            files = backups.storage_backups.len(),
            snapshots = backups.guest_snapshots.len(),
            "Collected hypervisor backups"
        );
        backups
    }

    async fn collect_node_backups(
        &self,
        handle: &EndpointHandle,
        node: &Node,
        guests: &[&Guest],
        task_limit: usize,
    ) -> PveBackups {
        let (backup_tasks, storage_backups, guest_snapshots) = tokio::join!(
            self.backup_tasks(handle, node, task_limit),
            self.storage_backups(handle, node),
            self.guest_snapshots(handle, node, guests),
        );

        PveBackups {
            backup_tasks,
            storage_backups,
            guest_snapshots,
        }
    }

    async fn backup_tasks(
        &self,
        handle: &EndpointHandle,
        node: &Node,
        task_limit: usize,
    ) -> Vec<PveBackupTask> {
        let endpoint_id = handle.config.id.as_str();
        let path = format!("/nodes/{}/tasks?typefilter=vzdump&limit={}", node.node, task_limit);

        match get_list(handle.client.as_ref(), &path, self.config.resource_timeout).await {
            Ok(entries) => entries
                .iter()
                .filter_map(|entry| backup_task_from_entry(entry, endpoint_id, &node.node))
                .collect(),
            Err(e) => {
                log_degraded(&e, endpoint_id, &format!("backup tasks of node {}", node.node));
                Vec::new()
            }
        }
    }

    async fn storage_backups(&self, handle: &EndpointHandle, node: &Node) -> Vec<StorageBackup> {
        let storages: Vec<&StorageInfo> = node
            .storage
            .iter()
            .filter(|s| s.enabled && s.holds_backups() && s.storage_type != "pbs")
            .collect();
        if storages.is_empty() {
            return Vec::new();
        }

        // Local storage is only readable through the node itself
        let direct = if storages.iter().any(|s| !s.shared) {
            self.direct_client(handle, &node.node, node.ip.as_deref()).await
        } else {
            None
        };

        let fetches = storages.into_iter().map(|storage| {
            let client: Arc<dyn ApiClient> = match (&direct, storage.shared) {
                (Some(direct), false) => Arc::clone(direct),
                _ => Arc::clone(&handle.client),
            };
            self.storage_content(client, handle, node, storage)
        });

        join_all(fetches).await.into_iter().flatten().collect()
    }

    async fn storage_content(
        &self,
        client: Arc<dyn ApiClient>,
        handle: &EndpointHandle,
        node: &Node,
        storage: &StorageInfo,
    ) -> Vec<StorageBackup> {
        let endpoint_id = handle.config.id.as_str();
        let path = format!(
            "/nodes/{}/storage/{}/content?content=backup",
            node.node, storage.storage
        );

        match get_list(client.as_ref(), &path, self.config.resource_timeout).await {
            Ok(entries) => entries
                .iter()
                .filter_map(|entry| storage_backup_from_entry(entry, endpoint_id, &node.node, storage))
                .collect(),
            Err(e) => {
                log_degraded(
                    &e,
                    endpoint_id,
                    &format!("backups on storage {} of node {}", storage.storage, node.node),
                );
                Vec::new()
            }
        }
    }

    async fn guest_snapshots(
        &self,
        handle: &EndpointHandle,
        node: &Node,
        guests: &[&Guest],
    ) -> Vec<GuestSnapshot> {
        let endpoint_id = handle.config.id.as_str();
        let timeout = self.config.resource_timeout;

        let fetches = guests.iter().map(|guest| async move {
            let path = format!(
                "/nodes/{}/{}/{}/snapshot",
                node.node,
                guest.guest_type.api_segment(),
                guest.vmid
            );
            match get_list(handle.client.as_ref(), &path, timeout).await {
                Ok(entries) => entries
                    .iter()
                    .filter(|entry| str_field(entry, "name") != Some("current"))
                    .filter_map(|entry| {
                        Some(GuestSnapshot {
                            endpoint_id: endpoint_id.to_string(),
                            node: node.node.clone(),
                            vmid: guest.vmid,
                            guest_type: guest.guest_type,
                            name: string_field(entry, "name")?,
                            description: string_field(entry, "description"),
                            snaptime: i64_field(entry, "snaptime"),
                            vmstate: bool_field(entry, "vmstate"),
                        })
                    })
                    .collect(),
                Err(e) => {
                    log_degraded(&e, endpoint_id, &format!("snapshots of guest {}", guest.vmid));
                    Vec::new()
                }
            }
        });

        join_all(fetches).await.into_iter().flatten().collect()
    }
}

fn backup_task_from_entry(entry: &Value, endpoint_id: &str, node: &str) -> Option<PveBackupTask> {
    Some(PveBackupTask {
        endpoint_id: endpoint_id.to_string(),
        node: str_field(entry, "node").unwrap_or(node).to_string(),
        upid: string_field(entry, "upid")?,
        vmid: str_field(entry, "id").and_then(|id| id.parse().ok()),
        status: string_field(entry, "status"),
        starttime: i64_field(entry, "starttime").unwrap_or(0),
        endtime: i64_field(entry, "endtime"),
        user: string_field(entry, "user"),
    })
}

fn storage_backup_from_entry(
    entry: &Value,
    endpoint_id: &str,
    node: &str,
    storage: &StorageInfo,
) -> Option<StorageBackup> {
    let verified = entry
        .get("verification")
        .and_then(|v| str_field(v, "state"))
        .map(|state| state == "ok");

    Some(StorageBackup {
        volid: string_field(entry, "volid")?,
        endpoint_id: endpoint_id.to_string(),
        node: node.to_string(),
        storage: storage.storage.clone(),
        format: string_field(entry, "format").unwrap_or_default(),
        size: u64_field(entry, "size").unwrap_or(0),
        ctime: i64_field(entry, "ctime").unwrap_or(0),
        vmid: u64_field(entry, "vmid").map(|v| v as u32),
        notes: string_field(entry, "notes"),
        protected: bool_field(entry, "protected"),
        verified,
        is_shared_storage: storage.shared,
        visible_on_nodes: vec![node.to_string()],
    })
}
