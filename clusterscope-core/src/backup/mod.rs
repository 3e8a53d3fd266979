//! Archive-server backup aggregation
//!
//! Per instance: discover the node name, enumerate datastores with usage,
//! walk datastore × namespace × group to collect snapshots, synthesize the
//! backup-run timeline and cross-reference it with the task history, then
//! attach node status, version and verification diagnostics.
//!
//! Failures of individual datastores, namespaces or groups degrade to empty
//! values. Only contract errors abort an instance, which is then reported
//! with `status: error`.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, Instrument};

use crate::client::fields::{f64_field, f64_list, str_field, string_field, u64_field};
use crate::client::{get_list, ApiClient, EndpointHandle, EndpointPool};
use crate::config::{BackupConfig, DiscoveryConfig};
use crate::error::{ClusterscopeError, ClusterscopeResult};
use crate::observability::{archive_span, log_degraded};
use crate::patterns::{partition_results, BoundedExecutor};
use crate::types::{
    Datastore, GcStatus, InstanceStatus, PbsNodeStatus, PbsTask, PbsTaskSummary, PbsVersionInfo,
    Snapshot, SnapshotVerification,
};

pub mod namespaces;
pub mod runs;
pub mod tasks;
pub mod verification;

pub use namespaces::{ApiNamespaceDiscovery, NamespaceDiscovery};
pub use runs::{build_timeline, BackupRun, BackupRunKey};
pub use tasks::{DefaultTaskProcessor, PbsTaskProcessor};
pub use verification::{diagnose, VerificationDiagnostics, VerifyJob};

/// Everything aggregated for one archive-server instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PbsInstance {
    pub pbs_endpoint_id: String,
    pub pbs_instance_name: String,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub node_name: Option<String>,
    pub datastores: Vec<Datastore>,
    pub backup_runs: Vec<BackupRun>,
    pub node_status: Option<PbsNodeStatus>,
    pub version_info: Option<PbsVersionInfo>,
    pub verification_diagnostics: Option<VerificationDiagnostics>,
    #[serde(flatten)]
    pub task_summary: PbsTaskSummary,
    /// Every task fetched from the instance
    #[serde(skip)]
    pub tasks: Vec<PbsTask>,
}

impl PbsInstance {
    fn empty(handle: &EndpointHandle, status: InstanceStatus) -> Self {
        Self {
            pbs_endpoint_id: handle.config.id.clone(),
            pbs_instance_name: handle.config.name.clone(),
            status,
            error: None,
            node_name: None,
            datastores: Vec::new(),
            backup_runs: Vec::new(),
            node_status: None,
            version_info: None,
            verification_diagnostics: None,
            task_summary: PbsTaskSummary::default(),
            tasks: Vec::new(),
        }
    }
}

pub struct BackupAggregator {
    namespaces: Arc<dyn NamespaceDiscovery>,
    task_processor: Arc<dyn PbsTaskProcessor>,
    config: BackupConfig,
    discovery_timeout: Duration,
    resource_timeout: Duration,
    group_concurrency: usize,
}

impl BackupAggregator {
    pub fn new(
        namespaces: Arc<dyn NamespaceDiscovery>,
        task_processor: Arc<dyn PbsTaskProcessor>,
        config: BackupConfig,
        discovery: &DiscoveryConfig,
    ) -> Self {
        Self {
            namespaces,
            task_processor,
            config,
            discovery_timeout: discovery.discovery_timeout,
            resource_timeout: discovery.resource_timeout,
            group_concurrency: discovery.node_fetch_concurrency,
        }
    }

    /// Aggregator with the API-backed namespace discovery and the default
    /// task processor
    pub fn with_defaults(config: BackupConfig, discovery: &DiscoveryConfig) -> Self {
        let recent = config.recent_task_count;
        Self::new(
            Arc::new(ApiNamespaceDiscovery::new(discovery.discovery_timeout)),
            Arc::new(DefaultTaskProcessor::new(recent)),
            config,
            discovery,
        )
    }

    /// Aggregate every archive-server instance concurrently
    pub async fn aggregate_all(&self, pool: &EndpointPool) -> Vec<PbsInstance> {
        join_all(pool.pbs_endpoints().map(|handle| self.aggregate_instance(handle))).await
    }

    /// Aggregate one instance; contract errors mark it as errored
    pub async fn aggregate_instance(&self, handle: &EndpointHandle) -> PbsInstance {
        let span = archive_span(&handle.config.id);
        async move {
            match self.process_instance(handle).await {
                Ok(instance) => instance,
                Err(e) => {
                    error!(error = %e, "Archive instance aborted");
                    let mut instance = PbsInstance::empty(handle, InstanceStatus::Error);
                    instance.error = Some(e.to_string());
                    instance
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process_instance(&self, handle: &EndpointHandle) -> ClusterscopeResult<PbsInstance> {
        let client = handle.client.as_ref();
        let endpoint_id = handle.config.id.as_str();

        let tasks_path = format!("/nodes/localhost/tasks?limit={}", self.config.pbs_task_limit);
        let (tasks, version, subscription, datastores, verify_jobs) = tokio::join!(
            get_list(client, &tasks_path, self.discovery_timeout),
            client.get("/version", self.discovery_timeout),
            client.get("/subscription", self.discovery_timeout),
            self.discover_datastores(handle),
            get_list(client, "/admin/verify", self.discovery_timeout),
        );

        let tasks: Option<Vec<PbsTask>> = match tasks {
            Ok(entries) => Some(entries.iter().filter_map(tasks::task_from_entry).collect()),
            Err(e) => {
                log_degraded(&e, endpoint_id, "task list");
                None
            }
        };

        let version_info = match version {
            Ok(version) => {
                let subscription_status = match subscription {
                    Ok(sub) => string_field(&sub, "status"),
                    Err(e) => {
                        log_degraded(&e, endpoint_id, "subscription");
                        None
                    }
                };
                Some(PbsVersionInfo {
                    version: string_field(&version, "version"),
                    release: string_field(&version, "release"),
                    repoid: string_field(&version, "repoid"),
                    subscription_status,
                })
            }
            Err(e) => {
                log_degraded(&e, endpoint_id, "version");
                None
            }
        };

        // Nothing answered: the server has not come up yet
        if tasks.is_none() && version_info.is_none() && datastores.is_none() {
            info!("Archive server unreachable, pending initialization");
            return Ok(PbsInstance::empty(handle, InstanceStatus::PendingInitialization));
        }

        let node_name = self.node_name(handle, tasks.as_deref().unwrap_or_default())?;
        let node_status = self.node_status(client, endpoint_id, &node_name).await;

        let mut datastores = datastores.unwrap_or_default();
        let retention_cutoff = Utc::now().timestamp() - self.config.retention_secs();
        for datastore in &mut datastores {
            let mut snapshots = self.datastore_snapshots(handle, &datastore.name).await;
            snapshots.retain(|s| s.backup_time >= retention_cutoff);
            snapshots.sort_by(|a, b| b.backup_time.cmp(&a.backup_time));
            datastore.snapshots = snapshots;
        }

        let all_tasks = tasks.clone().unwrap_or_default();
        let (backup_tasks, _admin_tasks) = tasks::split_backup_tasks(&all_tasks);
        let backup_tasks: Vec<_> = backup_tasks
            .into_iter()
            .filter(|t| t.task.starttime >= retention_cutoff)
            .collect();
        let snapshots: Vec<Snapshot> = datastores.iter().flat_map(|d| d.snapshots.clone()).collect();
        let backup_runs = build_timeline(snapshots, backup_tasks);

        let verify_jobs: Vec<VerifyJob> = match verify_jobs {
            Ok(entries) => entries.iter().filter_map(VerifyJob::from_entry).collect(),
            Err(e) => {
                log_degraded(&e, endpoint_id, "verification jobs");
                Vec::new()
            }
        };
        let verification_diagnostics = diagnose(
            &datastores,
            &verify_jobs,
            &all_tasks,
            Utc::now().timestamp(),
            self.config.verification_lookback,
        );

        let task_summary = self.task_processor.process(tasks.as_deref());

        info!(
            node = %node_name,
            datastores = datastores.len(),
            runs = backup_runs.len(),
            tasks = all_tasks.len(),
            "Archive instance aggregated"
        );

        Ok(PbsInstance {
            pbs_endpoint_id: handle.config.id.clone(),
            pbs_instance_name: handle.config.name.clone(),
            status: InstanceStatus::Ok,
            error: None,
            node_name: Some(node_name),
            datastores,
            backup_runs,
            node_status,
            version_info,
            verification_diagnostics: Some(verification_diagnostics),
            task_summary,
            tasks: all_tasks,
        })
    }

    /// Configured override, then the task list, then the configured name
    fn node_name(&self, handle: &EndpointHandle, tasks: &[PbsTask]) -> ClusterscopeResult<String> {
        handle
            .config
            .node_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| tasks::discover_node_name(tasks))
            .or_else(|| Some(handle.config.name.clone()).filter(|n| !n.is_empty()))
            .ok_or_else(|| ClusterscopeError::contract(&handle.config.id, "no node name could be determined"))
    }

    async fn node_status(
        &self,
        client: &dyn ApiClient,
        endpoint_id: &str,
        node_name: &str,
    ) -> Option<PbsNodeStatus> {
        let path = format!("/nodes/{}/status", node_name);
        match client.get(&path, self.resource_timeout).await {
            Ok(status) => Some(PbsNodeStatus {
                cpu: f64_field(&status, "cpu"),
                memory_total: status.get("memory").and_then(|m| u64_field(m, "total")),
                memory_used: status.get("memory").and_then(|m| u64_field(m, "used")),
                uptime: u64_field(&status, "uptime"),
                loadavg: f64_list(&status, "loadavg"),
                rootfs_total: status.get("root").and_then(|r| u64_field(r, "total")),
                rootfs_used: status.get("root").and_then(|r| u64_field(r, "used")),
            }),
            Err(e) => {
                log_degraded(&e, endpoint_id, "node status");
                None
            }
        }
    }

    /// Datastores with usage, falling back to the plain configuration listing
    ///
    /// `None` when neither listing answered.
    pub async fn discover_datastores(&self, handle: &EndpointHandle) -> Option<Vec<Datastore>> {
        let client = handle.client.as_ref();
        let endpoint_id = handle.config.id.as_str();

        match get_list(client, "/status/datastore-usage", self.discovery_timeout).await {
            Ok(entries) => return Some(entries.iter().filter_map(datastore_from_usage).collect()),
            Err(e) => log_degraded(&e, endpoint_id, "datastore usage"),
        }

        match get_list(client, "/config/datastore", self.discovery_timeout).await {
            Ok(entries) => Some(
                entries
                    .iter()
                    .filter_map(|entry| {
                        Some(Datastore {
                            name: string_field(entry, "name")?,
                            path: string_field(entry, "path"),
                            total: None,
                            used: None,
                            available: None,
                            gc_status: None,
                            deduplication_factor: None,
                            snapshots: Vec::new(),
                        })
                    })
                    .collect(),
            ),
            Err(e) => {
                log_degraded(&e, endpoint_id, "datastore configuration");
                None
            }
        }
    }

    /// Snapshots of every group in every selected namespace of a datastore
    async fn datastore_snapshots(&self, handle: &EndpointHandle, datastore: &str) -> Vec<Snapshot> {
        let client = handle.client.as_ref();
        let endpoint_id = handle.config.id.as_str();
        let namespaces = self
            .namespaces
            .namespaces_to_query(client, datastore, &handle.config)
            .await;

        let mut groups = Vec::new();
        for namespace in &namespaces {
            let path = format!("/admin/datastore/{}/groups{}", datastore, ns_query(namespace, '?'));
            match get_list(client, &path, self.resource_timeout).await {
                Ok(entries) => groups.extend(entries.iter().filter_map(|entry| {
                    Some((
                        namespace.clone(),
                        string_field(entry, "backup-type")?,
                        string_field(entry, "backup-id")?,
                    ))
                })),
                Err(e) => log_degraded(
                    &e,
                    endpoint_id,
                    &format!("groups of {} namespace '{}'", datastore, namespace),
                ),
            }
        }

        let executor = BoundedExecutor::new(self.group_concurrency);
        let results = executor
            .run_all(groups, |(namespace, backup_type, backup_id)| async move {
                let path = format!(
                    "/admin/datastore/{}/snapshots?backup-type={}&backup-id={}{}",
                    datastore,
                    backup_type,
                    backup_id,
                    ns_query(&namespace, '&')
                );
                let entries = get_list(client, &path, self.resource_timeout).await?;
                Ok(entries
                    .iter()
                    .filter_map(|entry| snapshot_from_entry(entry, datastore, &namespace))
                    .collect::<Vec<_>>())
            })
            .await;

        let (snapshots, errors) = partition_results(results);
        for e in &errors {
            log_degraded(e, endpoint_id, &format!("snapshots of datastore {}", datastore));
        }
        let snapshots: Vec<Snapshot> = snapshots.into_iter().flatten().collect();
        debug!(datastore, snapshots = snapshots.len(), "Collected snapshots");
        snapshots
    }
}

fn ns_query(namespace: &str, separator: char) -> String {
    if namespace.is_empty() {
        String::new()
    } else {
        format!("{}ns={}", separator, namespace)
    }
}

/// Datastore from a `/status/datastore-usage` entry
///
/// The deduplication factor is the reported one or, failing that,
/// `index-data-bytes / disk-bytes` from the last garbage collection.
pub fn datastore_from_usage(entry: &Value) -> Option<Datastore> {
    let gc_status = entry.get("gc-status").map(|gc| GcStatus {
        disk_bytes: u64_field(gc, "disk-bytes"),
        index_data_bytes: u64_field(gc, "index-data-bytes"),
        disk_chunks: u64_field(gc, "disk-chunks"),
        upid: string_field(gc, "upid"),
    });

    let deduplication_factor = f64_field(entry, "deduplication-factor").or_else(|| {
        let gc = gc_status.as_ref()?;
        match (gc.index_data_bytes, gc.disk_bytes) {
            (Some(index), Some(disk)) if disk > 0 => Some(index as f64 / disk as f64),
            _ => None,
        }
    });

    Some(Datastore {
        name: string_field(entry, "store")?,
        path: string_field(entry, "path"),
        total: u64_field(entry, "total"),
        used: u64_field(entry, "used"),
        available: u64_field(entry, "avail"),
        gc_status,
        deduplication_factor,
        snapshots: Vec::new(),
    })
}

fn snapshot_from_entry(entry: &Value, datastore: &str, namespace: &str) -> Option<Snapshot> {
    let files = entry
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|f| f.as_str().or_else(|| str_field(f, "filename")))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let verification = entry.get("verification").and_then(|v| {
        Some(SnapshotVerification {
            state: string_field(v, "state")?,
            upid: string_field(v, "upid"),
        })
    });

    Some(Snapshot {
        datastore: datastore.to_string(),
        namespace: namespace.to_string(),
        backup_type: string_field(entry, "backup-type")?,
        backup_id: string_field(entry, "backup-id")?,
        backup_time: u64_field(entry, "backup-time")? as i64,
        size: u64_field(entry, "size").unwrap_or(0),
        protected: entry.get("protected").and_then(Value::as_bool).unwrap_or(false),
        verification,
        files,
        owner: string_field(entry, "owner"),
        comment: string_field(entry, "comment"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dedup_factor_derived_from_gc_status() {
        let entry = json!({
            "store": "store1",
            "total": 1000,
            "used": 400,
            "avail": 600,
            "gc-status": {"disk-bytes": 200, "index-data-bytes": 50}
        });

        let datastore = datastore_from_usage(&entry).unwrap();
        assert_eq!(datastore.deduplication_factor, Some(0.25));
        assert_eq!(datastore.available, Some(600));
    }

    #[test]
    fn test_reported_dedup_factor_wins() {
        let entry = json!({
            "store": "store1",
            "deduplication-factor": 3.5,
            "gc-status": {"disk-bytes": 200, "index-data-bytes": 50}
        });
        assert_eq!(datastore_from_usage(&entry).unwrap().deduplication_factor, Some(3.5));
    }

    #[test]
    fn test_snapshot_parsing() {
        let entry = json!({
            "backup-type": "vm",
            "backup-id": "100",
            "backup-time": 1704067200,
            "size": 4096,
            "protected": true,
            "verification": {"state": "ok", "upid": "UPID:pbs1:1"},
            "files": [{"filename": "index.json.blob"}, "drive-scsi0.img.fidx"]
        });

        let snapshot = snapshot_from_entry(&entry, "store1", "prod").unwrap();
        assert_eq!(snapshot.namespace, "prod");
        assert!(snapshot.protected);
        assert!(snapshot.verification.unwrap().is_ok());
        assert_eq!(snapshot.files.len(), 2);
    }

    #[test]
    fn test_namespace_query() {
        assert_eq!(ns_query("", '?'), "");
        assert_eq!(ns_query("prod/db", '&'), "&ns=prod/db");
    }
}
