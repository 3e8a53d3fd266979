//! Backup-run timeline synthesis
//!
//! Every retained snapshot becomes a synthetic run. Administrative backup
//! tasks then enhance the closest matching run, and tasks that never matched
//! but did not succeed become failure-only runs. A task's UPID is consumed at
//! most once per pass.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use super::tasks::{BackupTarget, TargetedTask};
use crate::types::{PbsTask, Snapshot};

const SECONDS_PER_DAY: i64 = 86_400;

/// Identity of a backup run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRunKey {
    /// Exact snapshot time (or task start for failure-only runs), seconds
    pub time_key: i64,
    pub datastore: String,
    pub namespace: String,
    pub backup_type: String,
    pub backup_id: String,
}

impl BackupRunKey {
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            time_key: snapshot.backup_time,
            datastore: snapshot.datastore.clone(),
            namespace: snapshot.namespace.clone(),
            backup_type: snapshot.backup_type.clone(),
            backup_id: snapshot.backup_id.clone(),
        }
    }

    fn for_task(task: &PbsTask, target: &BackupTarget) -> Self {
        Self {
            time_key: task.starttime,
            datastore: target.datastore.clone(),
            namespace: target.namespace.clone().unwrap_or_default(),
            backup_type: target.backup_type.clone(),
            backup_id: target.backup_id.clone(),
        }
    }

    fn day(&self) -> i64 {
        self.time_key.div_euclid(SECONDS_PER_DAY)
    }
}

/// One backup attempt on the timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum BackupRun {
    /// Derived from a snapshot alone; its existence implies success
    Synthetic { key: BackupRunKey, snapshot: Snapshot },
    /// Snapshot matched with the task that produced it
    Enhanced {
        key: BackupRunKey,
        snapshot: Snapshot,
        task: PbsTask,
    },
    /// A task that left no snapshot behind
    FailureOnly { key: BackupRunKey, task: PbsTask },
}

impl BackupRun {
    pub fn synthetic(snapshot: Snapshot) -> Self {
        BackupRun::Synthetic {
            key: BackupRunKey::for_snapshot(&snapshot),
            snapshot,
        }
    }

    pub fn key(&self) -> &BackupRunKey {
        match self {
            BackupRun::Synthetic { key, .. }
            | BackupRun::Enhanced { key, .. }
            | BackupRun::FailureOnly { key, .. } => key,
        }
    }

    fn task(&self) -> Option<&PbsTask> {
        match self {
            BackupRun::Synthetic { .. } => None,
            BackupRun::Enhanced { task, .. } | BackupRun::FailureOnly { task, .. } => Some(task),
        }
    }

    /// Attach `task` as the source of truth for timing and outcome
    ///
    /// The key and snapshot never change; a run that already carried a task
    /// has it replaced.
    pub fn enhance(self, task: PbsTask) -> Self {
        match self {
            BackupRun::Synthetic { key, snapshot } | BackupRun::Enhanced { key, snapshot, .. } => {
                BackupRun::Enhanced {
                    key,
                    snapshot,
                    task,
                }
            }
            BackupRun::FailureOnly { key, .. } => BackupRun::FailureOnly { key, task },
        }
    }

    pub fn upid(&self) -> Option<&str> {
        self.task().map(|t| t.upid.as_str())
    }

    /// `OK` for synthetic runs, the task status otherwise
    pub fn status(&self) -> &str {
        match self.task() {
            Some(task) => task.status.as_deref().unwrap_or("running"),
            None => "OK",
        }
    }

    pub fn start_time(&self) -> i64 {
        self.task().map(|t| t.starttime).unwrap_or(self.key().time_key)
    }

    pub fn end_time(&self) -> Option<i64> {
        match self.task() {
            Some(task) => task.endtime,
            None => Some(self.key().time_key),
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            BackupRun::Synthetic { snapshot, .. } => snapshot.owner.as_deref(),
            BackupRun::Enhanced { task, .. } | BackupRun::FailureOnly { task, .. } => task.user.as_deref(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            BackupRun::Synthetic { snapshot, .. } | BackupRun::Enhanced { snapshot, .. } => snapshot.size,
            BackupRun::FailureOnly { .. } => 0,
        }
    }

    pub fn snapshot_count(&self) -> u32 {
        match self {
            BackupRun::FailureOnly { .. } => 0,
            _ => 1,
        }
    }

    /// Key used by the final dedup pass: the UPID, or a composite when absent
    fn dedup_key(&self) -> String {
        match self.upid() {
            Some(upid) => upid.to_string(),
            None => {
                let key = self.key();
                format!(
                    "{}|{}|{}|{}|{}/{}",
                    key.backup_type,
                    self.task().map(|t| t.node.as_str()).unwrap_or(""),
                    self.start_time(),
                    key.datastore,
                    key.namespace,
                    key.backup_id
                )
            }
        }
    }
}

/// Build the timeline from retained snapshots and backup tasks
pub fn build_timeline(snapshots: Vec<Snapshot>, backup_tasks: Vec<TargetedTask>) -> Vec<BackupRun> {
    let mut runs: Vec<BackupRun> = snapshots.into_iter().map(BackupRun::synthetic).collect();
    runs.sort_by(|a, b| a.key().cmp(b.key()));

    // Last write wins per (day, datastore, type, id); slots are walked in order
    let mut index: BTreeMap<(i64, String, String, String), &TargetedTask> = BTreeMap::new();
    for targeted in &backup_tasks {
        let slot = (
            targeted.task.starttime.div_euclid(SECONDS_PER_DAY),
            targeted.target.datastore.clone(),
            targeted.target.backup_type.clone(),
            targeted.target.backup_id.clone(),
        );
        match index.get(&slot) {
            Some(existing) if existing.task.starttime >= targeted.task.starttime => {}
            _ => {
                index.insert(slot, targeted);
            }
        }
    }

    let mut consumed: HashSet<String> = HashSet::new();
    for targeted in index.values() {
        let task = &targeted.task;
        if consumed.contains(&task.upid) {
            continue;
        }
        let closest = runs
            .iter()
            .enumerate()
            .filter(|(_, run)| matches!(run, BackupRun::Synthetic { .. }))
            .filter(|(_, run)| matches_target(run.key(), task, &targeted.target))
            .min_by_key(|(_, run)| (run.key().time_key - task.starttime).abs())
            .map(|(i, _)| i);

        if let Some(i) = closest {
            let run = runs.remove(i);
            runs.insert(i, run.enhance(task.clone()));
            consumed.insert(task.upid.clone());
        }
    }

    for targeted in backup_tasks {
        let task = &targeted.task;
        if consumed.contains(&task.upid) || !task.is_finished() || task.is_ok() {
            continue;
        }
        consumed.insert(task.upid.clone());
        runs.push(BackupRun::FailureOnly {
            key: BackupRunKey::for_task(task, &targeted.target),
            task: targeted.task,
        });
    }

    dedup_runs(runs)
}

fn matches_target(key: &BackupRunKey, task: &PbsTask, target: &BackupTarget) -> bool {
    key.day() == task.starttime.div_euclid(SECONDS_PER_DAY)
        && key.datastore == target.datastore
        && key.backup_type == target.backup_type
        && key.backup_id == target.backup_id
        && target.namespace.as_ref().map_or(true, |ns| *ns == key.namespace)
}

/// Keep the first run per dedup key
pub fn dedup_runs(runs: Vec<BackupRun>) -> Vec<BackupRun> {
    let mut seen = HashSet::new();
    runs.into_iter().filter(|run| seen.insert(run.dedup_key())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(id: &str, time: i64) -> Snapshot {
        Snapshot {
            datastore: "store1".to_string(),
            namespace: String::new(),
            backup_type: "vm".to_string(),
            backup_id: id.to_string(),
            backup_time: time,
            size: 100,
            protected: false,
            verification: None,
            files: Vec::new(),
            owner: Some("root@pam".to_string()),
            comment: None,
        }
    }

    fn task(upid: &str, id: &str, start: i64, status: &str) -> TargetedTask {
        TargetedTask {
            task: PbsTask {
                upid: upid.to_string(),
                node: "pbs1".to_string(),
                worker_type: "backup".to_string(),
                worker_id: Some(format!("store1:vm/{}", id)),
                user: Some("backup@pbs".to_string()),
                starttime: start,
                endtime: Some(start + 60),
                status: Some(status.to_string()),
            },
            target: BackupTarget {
                datastore: "store1".to_string(),
                namespace: None,
                backup_type: "vm".to_string(),
                backup_id: id.to_string(),
            },
        }
    }

    const DAY: i64 = 1_704_067_200; // 2024-01-01T00:00:00Z

    #[test]
    fn test_one_run_per_snapshot_on_the_same_day() {
        let snapshots = vec![snapshot("100", DAY + 100), snapshot("100", DAY + 3_600), snapshot("100", DAY + 7_200)];

        let runs = build_timeline(snapshots, Vec::new());

        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.status() == "OK" && r.upid().is_none()));
    }

    #[test]
    fn test_task_enhances_closest_run_only() {
        let snapshots = vec![snapshot("100", DAY + 100), snapshot("100", DAY + 7_200)];
        let tasks = vec![task("UPID:pbs1:a", "100", DAY + 7_150, "OK")];

        let runs = build_timeline(snapshots, tasks);

        assert_eq!(runs.len(), 2);
        let enhanced: Vec<&BackupRun> = runs.iter().filter(|r| r.upid().is_some()).collect();
        assert_eq!(enhanced.len(), 1);
        assert_eq!(enhanced[0].key().time_key, DAY + 7_200);
        assert_eq!(enhanced[0].start_time(), DAY + 7_150);
        assert_eq!(enhanced[0].user(), Some("backup@pbs"));
    }

    #[test]
    fn test_unmatched_failed_task_becomes_failure_only_run() {
        let snapshots = vec![snapshot("100", DAY + 100)];
        let tasks = vec![
            task("UPID:pbs1:a", "100", DAY + 90, "OK"),
            task("UPID:pbs1:b", "200", DAY + 500, "connection error"),
            task("UPID:pbs1:c", "300", DAY + 600, "OK"),
        ];

        let runs = build_timeline(snapshots, tasks);

        assert_eq!(runs.len(), 2);
        let failure = runs.iter().find(|r| r.upid() == Some("UPID:pbs1:b")).unwrap();
        assert!(matches!(failure, BackupRun::FailureOnly { .. }));
        assert_eq!(failure.size(), 0);
        assert_eq!(failure.snapshot_count(), 0);
        assert_eq!(failure.status(), "connection error");
    }

    #[test]
    fn test_enhance_is_total() {
        let run = BackupRun::synthetic(snapshot("100", DAY));
        let t = task("UPID:pbs1:a", "100", DAY, "OK").task;

        let enhanced = run.clone().enhance(t.clone());
        assert_eq!(enhanced.key(), run.key());
        assert_eq!(enhanced.size(), 100);

        let failure = BackupRun::FailureOnly {
            key: run.key().clone(),
            task: t.clone(),
        };
        let mut replacement = t;
        replacement.upid = "UPID:pbs1:z".to_string();
        let failure = failure.enhance(replacement);
        assert_eq!(failure.upid(), Some("UPID:pbs1:z"));
        assert_eq!(failure.snapshot_count(), 0);
    }

    #[test]
    fn test_shared_upid_goes_to_first_slot_in_key_order() {
        let snapshots = vec![snapshot("200", DAY + 100), snapshot("100", DAY + 100)];
        let tasks = vec![
            task("UPID:pbs1:x", "200", DAY + 90, "OK"),
            task("UPID:pbs1:x", "100", DAY + 90, "OK"),
        ];

        for _ in 0..8 {
            let runs = build_timeline(snapshots.clone(), tasks.clone());
            let enhanced: Vec<&str> = runs
                .iter()
                .filter(|r| r.upid().is_some())
                .map(|r| r.key().backup_id.as_str())
                .collect();
            assert_eq!(enhanced, vec!["100"]);
        }
    }
}
