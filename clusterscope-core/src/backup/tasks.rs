//! Archive-server task handling
//!
//! Tasks arrive as one flat list. Real backup tasks carry a worker id of the
//! form `store[:namespace]:type/id` and feed the backup timeline; everything
//! else (verify, sync, prune, garbage collection) is summarised by a
//! [`PbsTaskProcessor`].

use serde_json::Value;

use crate::client::fields::{i64_field, string_field};
use crate::types::{PbsTask, PbsTaskSummary, TaskCounts};

/// Placeholder node name used by archive servers addressed as `localhost`
const PLACEHOLDER_NODE: &str = "localhost";

/// Datastore and guest a backup task wrote to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub datastore: String,
    pub namespace: Option<String>,
    pub backup_type: String,
    pub backup_id: String,
}

/// Parse a backup task's worker id
///
/// Accepts `store:vm/100` and `store:ns/a:vm/100`; anything else is not a
/// real backup task.
pub fn parse_backup_target(worker_id: &str) -> Option<BackupTarget> {
    let (datastore, rest) = worker_id.split_once(':')?;
    let (namespace, group) = match rest.rsplit_once(':') {
        Some((ns, group)) => (Some(ns.trim_start_matches("ns/").replace("/ns/", "/")), group),
        None => (None, rest),
    };
    let (backup_type, backup_id) = group.split_once('/')?;

    if datastore.is_empty() || backup_type.is_empty() || backup_id.is_empty() {
        return None;
    }

    Some(BackupTarget {
        datastore: datastore.to_string(),
        namespace,
        backup_type: backup_type.to_string(),
        backup_id: backup_id.to_string(),
    })
}

pub fn task_from_entry(entry: &Value) -> Option<PbsTask> {
    let upid = string_field(entry, "upid")?;
    Some(PbsTask {
        node: string_field(entry, "node")
            .or_else(|| upid_node(&upid).map(str::to_string))
            .unwrap_or_default(),
        worker_type: string_field(entry, "worker_type").unwrap_or_default(),
        worker_id: string_field(entry, "worker_id"),
        user: string_field(entry, "user"),
        starttime: i64_field(entry, "starttime").unwrap_or(0),
        endtime: i64_field(entry, "endtime"),
        status: string_field(entry, "status"),
        upid,
    })
}

/// Node field of a UPID (`UPID:node:pid:...`)
pub fn upid_node(upid: &str) -> Option<&str> {
    let mut parts = upid.split(':');
    match (parts.next(), parts.next()) {
        (Some("UPID"), Some(node)) if !node.is_empty() => Some(node),
        _ => None,
    }
}

/// The archive server's real node name, as reported by its tasks
///
/// The UPID is preferred over the free-text node field; the placeholder
/// `localhost` never counts.
pub fn discover_node_name(tasks: &[PbsTask]) -> Option<String> {
    let from_upid = tasks
        .iter()
        .filter_map(|t| upid_node(&t.upid))
        .find(|node| *node != PLACEHOLDER_NODE);

    from_upid
        .or_else(|| {
            tasks
                .iter()
                .map(|t| t.node.as_str())
                .find(|node| !node.is_empty() && *node != PLACEHOLDER_NODE)
        })
        .map(str::to_string)
}

/// A real backup task with its parsed target
#[derive(Debug, Clone)]
pub struct TargetedTask {
    pub task: PbsTask,
    pub target: BackupTarget,
}

/// Real backup tasks with a parsable target, and everything else
pub fn split_backup_tasks(tasks: &[PbsTask]) -> (Vec<TargetedTask>, Vec<PbsTask>) {
    let mut backups = Vec::new();
    let mut others = Vec::new();

    for task in tasks {
        let target = (task.worker_type == "backup")
            .then(|| task.worker_id.as_deref().and_then(parse_backup_target))
            .flatten();
        match target {
            Some(target) => backups.push(TargetedTask {
                task: task.clone(),
                target,
            }),
            None => others.push(task.clone()),
        }
    }

    (backups, others)
}

/// Summarises an instance's task list
pub trait PbsTaskProcessor: Send + Sync {
    /// `None` when the task list could not be fetched
    fn process(&self, tasks: Option<&[PbsTask]>) -> PbsTaskSummary;
}

/// Buckets tasks by worker type and keeps the most recent ones
pub struct DefaultTaskProcessor {
    recent_limit: usize,
}

impl DefaultTaskProcessor {
    pub fn new(recent_limit: usize) -> Self {
        Self { recent_limit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskBucket {
    Backup,
    Verification,
    Sync,
    PruneGc,
    Other,
}

fn bucket(worker_type: &str) -> TaskBucket {
    match worker_type {
        "backup" => TaskBucket::Backup,
        "verify" | "verificationjob" | "verify_group" | "verify_snapshot" => TaskBucket::Verification,
        "sync" | "syncjob" => TaskBucket::Sync,
        "prune" | "prunejob" | "garbage_collection" => TaskBucket::PruneGc,
        _ => TaskBucket::Other,
    }
}

fn count(counts: &mut TaskCounts, task: &PbsTask) {
    counts.total += 1;
    let finished_at = task.endtime.unwrap_or(task.starttime);
    if task.is_ok() {
        counts.ok += 1;
        counts.last_ok = counts.last_ok.max(Some(finished_at));
    } else if task.is_failed() {
        counts.failed += 1;
        counts.last_failed = counts.last_failed.max(Some(finished_at));
    }
}

impl PbsTaskProcessor for DefaultTaskProcessor {
    fn process(&self, tasks: Option<&[PbsTask]>) -> PbsTaskSummary {
        let Some(tasks) = tasks else {
            return PbsTaskSummary::default();
        };

        let mut summary = PbsTaskSummary::default();
        for task in tasks {
            match bucket(&task.worker_type) {
                TaskBucket::Backup => count(&mut summary.backup_tasks, task),
                TaskBucket::Verification => count(&mut summary.verification_tasks, task),
                TaskBucket::Sync => count(&mut summary.sync_tasks, task),
                TaskBucket::PruneGc => count(&mut summary.prune_gc_tasks, task),
                TaskBucket::Other => {}
            }
        }

        let mut recent: Vec<PbsTask> = tasks.to_vec();
        recent.sort_by(|a, b| b.starttime.cmp(&a.starttime));
        recent.truncate(self.recent_limit);
        summary.recent_tasks = recent;
        summary
    }
}

/// Whether a task belongs to verification
pub fn is_verification_task(task: &PbsTask) -> bool {
    bucket(&task.worker_type) == TaskBucket::Verification
}

/// Datastore a non-backup task operated on, from its worker id prefix
pub fn task_datastore(task: &PbsTask) -> Option<&str> {
    task.worker_id
        .as_deref()
        .map(|id| id.split(':').next().unwrap_or(id))
        .filter(|store| !store.is_empty())
}
