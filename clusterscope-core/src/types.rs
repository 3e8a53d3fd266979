//! Data model shared by every discovery component
//!
//! Every entity carries the `endpoint_id` of the endpoint that produced it;
//! merge and cache fallback logic key on it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node availability as seen from the serving endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Unknown,
}

impl NodeStatus {
    pub fn is_online(self) -> bool {
        self == NodeStatus::Online
    }
}

impl From<&str> for NodeStatus {
    fn from(s: &str) -> Self {
        match s {
            "online" => NodeStatus::Online,
            "offline" => NodeStatus::Offline,
            _ => NodeStatus::Unknown,
        }
    }
}

/// A storage definition as visible from one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub storage: String,
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Comma separated content types, e.g. `images,backup`
    pub content: String,
    pub shared: bool,
    pub enabled: bool,
    pub active: bool,
    pub total: u64,
    pub used: u64,
    pub avail: u64,
}

impl StorageInfo {
    pub fn holds_backups(&self) -> bool {
        self.content.split(',').any(|c| c.trim() == "backup")
    }
}

/// A cluster member. Identity is `(endpoint_id, node)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub endpoint_id: String,
    /// Raw node name as reported by the hypervisor
    pub node: String,
    pub display_name: String,
    pub status: NodeStatus,
    pub cpu: Option<f64>,
    pub maxcpu: Option<u32>,
    pub mem: Option<u64>,
    pub maxmem: Option<u64>,
    pub disk: Option<u64>,
    pub maxdisk: Option<u64>,
    pub uptime: u64,
    pub loadavg: Vec<f64>,
    pub ip: Option<String>,
    pub storage: Vec<StorageInfo>,
    pub is_cluster_member: bool,
    pub cluster_name: Option<String>,
    /// Held online against a conflicting offline reading
    #[serde(default)]
    pub possible_transition: bool,
    /// Unix millis when the transition was first detected
    #[serde(default)]
    pub transition_detected_at: Option<i64>,
    /// Backfilled from the last-known-good cache
    #[serde(default)]
    pub from_cache: bool,
    /// Unix millis of the cached reading, when `from_cache`
    #[serde(default)]
    pub cached_at: Option<i64>,
}

impl Node {
    /// A node that is known to exist but was not queried
    pub fn offline(endpoint_id: &str, node: &str, display_name: String) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            node: node.to_string(),
            display_name,
            status: NodeStatus::Offline,
            cpu: None,
            maxcpu: None,
            mem: None,
            maxmem: None,
            disk: None,
            maxdisk: None,
            uptime: 0,
            loadavg: Vec::new(),
            ip: None,
            storage: Vec::new(),
            is_cluster_member: false,
            cluster_name: None,
            possible_transition: false,
            transition_detected_at: None,
            from_cache: false,
            cached_at: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status.is_online()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestType {
    Qemu,
    Lxc,
}

impl GuestType {
    /// Path segment used by the hypervisor API
    pub fn api_segment(self) -> &'static str {
        match self {
            GuestType::Qemu => "qemu",
            GuestType::Lxc => "lxc",
        }
    }

    /// Backup-type label used by archive servers
    pub fn backup_type(self) -> &'static str {
        match self {
            GuestType::Qemu => "vm",
            GuestType::Lxc => "ct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

impl From<&str> for GuestStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => GuestStatus::Running,
            "stopped" => GuestStatus::Stopped,
            "paused" | "suspended" => GuestStatus::Paused,
            _ => GuestStatus::Unknown,
        }
    }
}

/// A VM or container. Identity is `(endpoint_id, vmid)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub endpoint_id: String,
    pub vmid: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub guest_type: GuestType,
    pub node: String,
    pub status: GuestStatus,
    pub cpu: Option<f64>,
    pub cpus: Option<f64>,
    pub mem: Option<u64>,
    pub maxmem: Option<u64>,
    pub disk: Option<u64>,
    pub maxdisk: Option<u64>,
    pub uptime: u64,
    pub netin: Option<u64>,
    pub netout: Option<u64>,
    pub diskread: Option<u64>,
    pub diskwrite: Option<u64>,
    pub agent_enabled: bool,
    pub template: bool,
    pub tags: Vec<String>,
}

impl Guest {
    pub fn is_running(&self) -> bool {
        self.status == GuestStatus::Running
    }

    /// Merge key: `endpoint_id:vmid`
    pub fn merge_key(&self) -> String {
        format!("{}:{}", self.endpoint_id, self.vmid)
    }
}

/// A backup file found on hypervisor storage. Identity is `volid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageBackup {
    pub volid: String,
    pub endpoint_id: String,
    pub node: String,
    pub storage: String,
    pub format: String,
    pub size: u64,
    pub ctime: i64,
    pub vmid: Option<u32>,
    pub notes: Option<String>,
    pub protected: bool,
    pub verified: Option<bool>,
    pub is_shared_storage: bool,
    /// Nodes from which this same file is visible
    pub visible_on_nodes: Vec<String>,
}

/// A vzdump task read from a hypervisor node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PveBackupTask {
    pub endpoint_id: String,
    pub node: String,
    pub upid: String,
    pub vmid: Option<u32>,
    pub status: Option<String>,
    pub starttime: i64,
    pub endtime: Option<i64>,
    pub user: Option<String>,
}

/// A point-in-time guest snapshot on a hypervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSnapshot {
    pub endpoint_id: String,
    pub node: String,
    pub vmid: u32,
    #[serde(rename = "type")]
    pub guest_type: GuestType,
    pub name: String,
    pub description: Option<String>,
    pub snaptime: Option<i64>,
    pub vmstate: bool,
}

/// Backup data gathered from the hypervisor side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PveBackups {
    pub backup_tasks: Vec<PveBackupTask>,
    pub storage_backups: Vec<StorageBackup>,
    pub guest_snapshots: Vec<GuestSnapshot>,
}

impl PveBackups {
    pub fn extend(&mut self, other: PveBackups) {
        self.backup_tasks.extend(other.backup_tasks);
        self.storage_backups.extend(other.storage_backups);
        self.guest_snapshots.extend(other.guest_snapshots);
    }
}

/// Result of topology resolution for one failover group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Cluster,
    Standalone,
}

/// Endpoints believed to describe the same physical cluster, in failover order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointGroup {
    #[serde(rename = "type")]
    pub kind: GroupKind,
    /// Cluster name for clusters, the endpoint id for standalone endpoints
    pub cluster_id: String,
    pub primary_endpoint_id: String,
    pub backup_endpoint_ids: Vec<String>,
}

impl EndpointGroup {
    pub fn standalone(endpoint_id: &str) -> Self {
        Self {
            kind: GroupKind::Standalone,
            cluster_id: endpoint_id.to_string(),
            primary_endpoint_id: endpoint_id.to_string(),
            backup_endpoint_ids: Vec::new(),
        }
    }

    /// Primary first, then backups in order
    pub fn failover_order(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_endpoint_id.as_str())
            .chain(self.backup_endpoint_ids.iter().map(String::as_str))
    }

    pub fn is_cluster(&self) -> bool {
        self.kind == GroupKind::Cluster
    }
}

/// Discovery result for one endpoint group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDiscovery {
    /// Endpoint that actually served the data; `None` when no endpoint did
    pub source_endpoint: Option<String>,
    pub nodes: Vec<Node>,
    pub vms: Vec<Guest>,
    pub containers: Vec<Guest>,
}

impl GroupDiscovery {
    pub fn has_data(&self) -> bool {
        !(self.nodes.is_empty() && self.vms.is_empty() && self.containers.is_empty())
    }
}

/// Verification state of an archive snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotVerification {
    pub state: String,
    #[serde(default)]
    pub upid: Option<String>,
}

impl SnapshotVerification {
    pub fn is_ok(&self) -> bool {
        self.state == "ok"
    }
}

/// One backup snapshot on an archive server.
/// Identity is `(datastore, namespace, backup_type, backup_id, backup_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub datastore: String,
    pub namespace: String,
    pub backup_type: String,
    pub backup_id: String,
    pub backup_time: i64,
    pub size: u64,
    pub protected: bool,
    pub verification: Option<SnapshotVerification>,
    pub files: Vec<String>,
    pub owner: Option<String>,
    pub comment: Option<String>,
}

/// Garbage collection state reported with datastore usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcStatus {
    pub disk_bytes: Option<u64>,
    pub index_data_bytes: Option<u64>,
    pub disk_chunks: Option<u64>,
    pub upid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datastore {
    pub name: String,
    pub path: Option<String>,
    pub total: Option<u64>,
    pub used: Option<u64>,
    pub available: Option<u64>,
    pub gc_status: Option<GcStatus>,
    pub deduplication_factor: Option<f64>,
    pub snapshots: Vec<Snapshot>,
}

/// An administrative task read from an archive server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbsTask {
    pub upid: String,
    pub node: String,
    pub worker_type: String,
    pub worker_id: Option<String>,
    pub user: Option<String>,
    pub starttime: i64,
    pub endtime: Option<i64>,
    /// `OK`, `WARNINGS: n`, an error text, or `None` while running
    pub status: Option<String>,
}

impl PbsTask {
    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_ok(&self) -> bool {
        self.status.as_deref() == Some("OK")
    }

    pub fn is_failed(&self) -> bool {
        match self.status.as_deref() {
            None | Some("OK") => false,
            Some(s) => !s.starts_with("WARNINGS"),
        }
    }
}

/// Counts of tasks grouped by outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
    pub last_ok: Option<i64>,
    pub last_failed: Option<i64>,
}

/// Output of the archive task post-processor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbsTaskSummary {
    pub recent_tasks: Vec<PbsTask>,
    pub backup_tasks: TaskCounts,
    pub verification_tasks: TaskCounts,
    pub sync_tasks: TaskCounts,
    pub prune_gc_tasks: TaskCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTaskSummary {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
}

/// Per-instance health of an archive server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbsNodeStatus {
    pub cpu: Option<f64>,
    pub memory_total: Option<u64>,
    pub memory_used: Option<u64>,
    pub uptime: Option<u64>,
    pub loadavg: Vec<f64>,
    pub rootfs_total: Option<u64>,
    pub rootfs_used: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbsVersionInfo {
    pub version: Option<String>,
    pub release: Option<String>,
    pub repoid: Option<String>,
    pub subscription_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Ok,
    Error,
    PendingInitialization,
}

/// Time series point as returned by the hypervisor's rrddata call
pub type RrdPoint = HashMap<String, serde_json::Value>;
