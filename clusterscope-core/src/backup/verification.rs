//! Verification diagnostics for an archive-server instance
//!
//! Scores how well backups are being verified. The score starts at 100 and is
//! reduced for a missing verification setup, failing jobs, recent failures and
//! configuration issues:
//!
//! ```text
//! no verification jobs     -30
//! per failing job          -20
//! per recent failure       -10
//! per configuration issue  -15
//! ```

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use super::tasks::{is_verification_task, task_datastore};
use crate::client::fields::{bool_field, string_field, u64_field};
use crate::types::{Datastore, PbsTask};

const NO_JOBS_PENALTY: u32 = 30;
const FAILING_JOB_PENALTY: u32 = 20;
const RECENT_FAILURE_PENALTY: u32 = 10;
const CONFIG_ISSUE_PENALTY: u32 = 15;

/// A configured verification job (`/admin/verify`)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyJob {
    pub id: String,
    pub store: String,
    pub namespace: Option<String>,
    pub schedule: Option<String>,
    pub ignore_verified: bool,
    pub outdated_after: Option<u64>,
}

impl VerifyJob {
    pub fn from_entry(entry: &Value) -> Option<Self> {
        Some(Self {
            id: string_field(entry, "id")?,
            store: string_field(entry, "store")?,
            namespace: string_field(entry, "ns"),
            schedule: string_field(entry, "schedule"),
            ignore_verified: bool_field(entry, "ignore-verified"),
            outdated_after: u64_field(entry, "outdated-after"),
        })
    }

    fn owns(&self, task: &PbsTask) -> bool {
        task.worker_id.as_deref().map_or(false, |id| {
            id == self.id || id.ends_with(&format!(":{}", self.id))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    MissingData,
    DataCorruption,
    NetworkIssue,
    AccessDenied,
    StorageSpace,
    Unknown,
}

impl FailureCategory {
    /// Categorize a failure by its state or status text
    pub fn from_message(message: &str) -> Self {
        let message = message.to_lowercase();
        let has = |patterns: &[&str]| patterns.iter().any(|p| message.contains(p));

        if has(&["missing", "not found"]) {
            FailureCategory::MissingData
        } else if has(&["corrupt", "checksum"]) {
            FailureCategory::DataCorruption
        } else if has(&["timeout", "timed out", "connection"]) {
            FailureCategory::NetworkIssue
        } else if has(&["permission", "access"]) {
            FailureCategory::AccessDenied
        } else if has(&["space", "disk"]) {
            FailureCategory::StorageSpace
        } else {
            FailureCategory::Unknown
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureCategory::MissingData => "missing backup data",
            FailureCategory::DataCorruption => "data corruption",
            FailureCategory::NetworkIssue => "network issue",
            FailureCategory::AccessDenied => "access denied",
            FailureCategory::StorageSpace => "storage space",
            FailureCategory::Unknown => "unknown",
        }
    }

    fn recommendation(self, datastore: &str) -> String {
        match self {
            FailureCategory::MissingData => format!(
                "Chunks are missing in {}; run a fresh backup of the affected guests",
                datastore
            ),
            FailureCategory::DataCorruption => format!(
                "Corrupted chunks in {}; check the underlying disks and re-run verification",
                datastore
            ),
            FailureCategory::NetworkIssue => {
                format!("Verification of {} hit network errors; check storage connectivity", datastore)
            }
            FailureCategory::AccessDenied => format!(
                "Verification of {} was denied access; check datastore path permissions",
                datastore
            ),
            FailureCategory::StorageSpace => format!(
                "{} is running out of space; prune old snapshots or run garbage collection",
                datastore
            ),
            FailureCategory::Unknown => {
                format!("Inspect the verification task logs for {}", datastore)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthGrade {
    pub fn from_score(score: u32) -> Self {
        if score >= 90 {
            HealthGrade::Excellent
        } else if score >= 75 {
            HealthGrade::Good
        } else if score >= 50 {
            HealthGrade::Fair
        } else if score >= 25 {
            HealthGrade::Poor
        } else {
            HealthGrade::Critical
        }
    }
}

/// One verification failure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationFailure {
    pub datastore: Option<String>,
    pub time: i64,
    pub message: String,
    pub category: FailureCategory,
    pub upid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreVerificationHealth {
    pub datastore: String,
    pub verified_snapshots: usize,
    pub failed_snapshots: usize,
    pub unverified_snapshots: usize,
    pub failure_categories: BTreeMap<FailureCategory, usize>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDiagnostics {
    pub score: u32,
    pub grade: HealthGrade,
    pub total_jobs: usize,
    pub failing_jobs: Vec<String>,
    pub recent_failures: Vec<VerificationFailure>,
    pub config_issues: Vec<String>,
    pub datastores: Vec<DatastoreVerificationHealth>,
    pub recommendations: Vec<String>,
}

/// Overall score from the individual findings, floored at 0
pub fn health_score(total_jobs: usize, failing_jobs: usize, recent_failures: usize, config_issues: usize) -> u32 {
    let mut penalty: u64 = 0;
    if total_jobs == 0 {
        penalty += u64::from(NO_JOBS_PENALTY);
    }
    penalty += failing_jobs as u64 * u64::from(FAILING_JOB_PENALTY);
    penalty += recent_failures as u64 * u64::from(RECENT_FAILURE_PENALTY);
    penalty += config_issues as u64 * u64::from(CONFIG_ISSUE_PENALTY);
    100u64.saturating_sub(penalty) as u32
}

/// Analyse verification health from jobs, task history and snapshot states
pub fn diagnose(
    datastores: &[Datastore],
    jobs: &[VerifyJob],
    tasks: &[PbsTask],
    now: i64,
    lookback: Duration,
) -> VerificationDiagnostics {
    let since = now - lookback.as_secs() as i64;
    let verify_tasks: Vec<&PbsTask> = tasks.iter().filter(|t| is_verification_task(t)).collect();

    let failing_jobs: Vec<String> = jobs
        .iter()
        .filter(|job| {
            verify_tasks
                .iter()
                .filter(|t| t.is_finished() && job.owns(t))
                .max_by_key(|t| t.starttime)
                .map_or(false, |last| last.is_failed())
        })
        .map(|job| job.id.clone())
        .collect();

    let task_failures: Vec<VerificationFailure> = verify_tasks
        .iter()
        .filter(|t| t.is_failed() && t.starttime >= since)
        .map(|t| {
            let message = t.status.clone().unwrap_or_default();
            VerificationFailure {
                datastore: task_datastore(t).map(str::to_string),
                time: t.starttime,
                category: FailureCategory::from_message(&message),
                message,
                upid: Some(t.upid.clone()),
            }
        })
        .collect();
    let task_upids: HashSet<&str> = task_failures.iter().filter_map(|f| f.upid.as_deref()).collect();

    // A failed snapshot whose verification UPID is a failed task is the same incident
    let mut snapshot_failures = Vec::new();
    let mut health = Vec::with_capacity(datastores.len());
    for datastore in datastores {
        let mut ds = DatastoreVerificationHealth {
            datastore: datastore.name.clone(),
            ..Default::default()
        };
        let mut snapshot_upids: HashSet<&str> = HashSet::new();

        for snapshot in &datastore.snapshots {
            match &snapshot.verification {
                Some(v) if v.is_ok() => ds.verified_snapshots += 1,
                Some(v) => {
                    ds.failed_snapshots += 1;
                    let category = FailureCategory::from_message(&v.state);
                    *ds.failure_categories.entry(category).or_default() += 1;
                    let upid = v.upid.as_deref();
                    if let Some(upid) = upid {
                        snapshot_upids.insert(upid);
                    }
                    if snapshot.backup_time >= since && !upid.map_or(false, |u| task_upids.contains(u)) {
                        snapshot_failures.push(VerificationFailure {
                            datastore: Some(datastore.name.clone()),
                            time: snapshot.backup_time,
                            message: format!(
                                "{}/{} verification {}",
                                snapshot.backup_type, snapshot.backup_id, v.state
                            ),
                            category,
                            upid: v.upid.clone(),
                        });
                    }
                }
                None => ds.unverified_snapshots += 1,
            }
        }

        for failure in &task_failures {
            let counted = failure.upid.as_deref().map_or(false, |u| snapshot_upids.contains(u));
            if failure.datastore.as_deref() == Some(datastore.name.as_str()) && !counted {
                *ds.failure_categories.entry(failure.category).or_default() += 1;
            }
        }

        if ds.unverified_snapshots > 0 {
            ds.recommendations.push(format!(
                "{} snapshot(s) in {} have never been verified",
                ds.unverified_snapshots, datastore.name
            ));
        }
        for category in ds.failure_categories.keys() {
            ds.recommendations.push(category.recommendation(&datastore.name));
        }

        health.push(ds);
    }

    let mut config_issues = Vec::new();
    if !jobs.is_empty() {
        for datastore in datastores {
            if !datastore.snapshots.is_empty() && !jobs.iter().any(|j| j.store == datastore.name) {
                config_issues.push(format!("Datastore {} has no verification job", datastore.name));
            }
        }
        for job in jobs {
            if !datastores.is_empty() && !datastores.iter().any(|d| d.name == job.store) {
                config_issues.push(format!(
                    "Verification job {} targets unknown datastore {}",
                    job.id, job.store
                ));
            }
            if job.schedule.is_none() {
                config_issues.push(format!("Verification job {} has no schedule", job.id));
            }
        }
    }

    let mut recent_failures = task_failures;
    recent_failures.extend(snapshot_failures);

    let score = health_score(jobs.len(), failing_jobs.len(), recent_failures.len(), config_issues.len());

    let mut recommendations = Vec::new();
    if jobs.is_empty() {
        recommendations.push("Create a scheduled verification job for each datastore".to_string());
    }
    for job in &failing_jobs {
        recommendations.push(format!("Verification job {} is failing; check its last task log", job));
    }
    for ds in &health {
        for rec in &ds.recommendations {
            if !recommendations.contains(rec) {
                recommendations.push(rec.clone());
            }
        }
    }

    VerificationDiagnostics {
        score,
        grade: HealthGrade::from_score(score),
        total_jobs: jobs.len(),
        failing_jobs,
        recent_failures,
        config_issues,
        datastores: health,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Snapshot, SnapshotVerification};
    use serde_json::json;

    #[test]
    fn test_failure_categories() {
        assert_eq!(FailureCategory::from_message("chunk not found"), FailureCategory::MissingData);
        assert_eq!(FailureCategory::from_message("Checksum mismatch"), FailureCategory::DataCorruption);
        assert_eq!(FailureCategory::from_message("connection reset"), FailureCategory::NetworkIssue);
        assert_eq!(FailureCategory::from_message("Permission denied"), FailureCategory::AccessDenied);
        assert_eq!(FailureCategory::from_message("no space left on device"), FailureCategory::StorageSpace);
        assert_eq!(FailureCategory::from_message("failed"), FailureCategory::Unknown);
        assert_eq!(FailureCategory::DataCorruption.label(), "data corruption");
    }

    #[test]
    fn test_score_and_grades() {
        assert_eq!(health_score(2, 0, 0, 0), 100);
        assert_eq!(health_score(0, 0, 0, 0), 70);
        assert_eq!(health_score(1, 1, 1, 0), 70);
        assert_eq!(health_score(0, 2, 5, 3), 0);

        assert_eq!(HealthGrade::from_score(90), HealthGrade::Excellent);
        assert_eq!(HealthGrade::from_score(75), HealthGrade::Good);
        assert_eq!(HealthGrade::from_score(50), HealthGrade::Fair);
        assert_eq!(HealthGrade::from_score(25), HealthGrade::Poor);
        assert_eq!(HealthGrade::from_score(24), HealthGrade::Critical);
    }

    #[test]
    fn test_verify_job_parsing() {
        let job = VerifyJob::from_entry(&json!({
            "id": "v-1", "store": "store1", "schedule": "daily", "ignore-verified": true, "outdated-after": 30
        }))
        .unwrap();
        assert_eq!(job.store, "store1");
        assert!(job.ignore_verified);
        assert_eq!(job.outdated_after, Some(30));
        assert!(VerifyJob::from_entry(&json!({"id": "v-2"})).is_none());
    }

    #[test]
    fn test_diagnose_failing_job_and_snapshot() {
        let now = 1_704_067_200;
        let snapshot = |state: Option<&str>| Snapshot {
            datastore: "store1".to_string(),
            namespace: String::new(),
            backup_type: "vm".to_string(),
            backup_id: "100".to_string(),
            backup_time: now - 3_600,
            size: 1,
            protected: false,
            verification: state.map(|s| SnapshotVerification {
                state: s.to_string(),
                upid: None,
            }),
            files: Vec::new(),
            owner: None,
            comment: None,
        };
        let datastore = Datastore {
            name: "store1".to_string(),
            path: None,
            total: None,
            used: None,
            available: None,
            gc_status: None,
            deduplication_factor: None,
            snapshots: vec![snapshot(Some("ok")), snapshot(Some("failed")), snapshot(None)],
        };
        let job = VerifyJob {
            id: "v-1".to_string(),
            store: "store1".to_string(),
            namespace: None,
            schedule: Some("daily".to_string()),
            ignore_verified: false,
            outdated_after: None,
        };
        let task = PbsTask {
            upid: "UPID:pbs1:1".to_string(),
            node: "pbs1".to_string(),
            worker_type: "verificationjob".to_string(),
            worker_id: Some("store1:v-1".to_string()),
            user: None,
            starttime: now - 600,
            endtime: Some(now - 500),
            status: Some("verification failed - chunk checksum mismatch".to_string()),
        };

        let diag = diagnose(&[datastore], &[job], &[task], now, Duration::from_secs(7 * 86_400));

        assert_eq!(diag.failing_jobs, vec!["v-1".to_string()]);
        // one failed task and one failed snapshot
        assert_eq!(diag.recent_failures.len(), 2);
        assert!(diag.config_issues.is_empty());
        assert_eq!(diag.score, 100 - 20 - 2 * 10);
        assert_eq!(diag.grade, HealthGrade::Fair);

        let ds = &diag.datastores[0];
        assert_eq!((ds.verified_snapshots, ds.failed_snapshots, ds.unverified_snapshots), (1, 1, 1));
        assert_eq!(ds.failure_categories.get(&FailureCategory::DataCorruption), Some(&1));
        assert!(!diag.recommendations.is_empty());
    }

    #[test]
    fn test_snapshot_and_task_sharing_upid_count_once() {
        let now = 1_704_067_200;
        let datastore = Datastore {
            name: "store1".to_string(),
            path: None,
            total: None,
            used: None,
            available: None,
            gc_status: None,
            deduplication_factor: None,
            snapshots: vec![Snapshot {
                datastore: "store1".to_string(),
                namespace: String::new(),
                backup_type: "vm".to_string(),
                backup_id: "100".to_string(),
                backup_time: now - 3_600,
                size: 1,
                protected: false,
                verification: Some(SnapshotVerification {
                    state: "failed".to_string(),
                    upid: Some("UPID:pbs1:V".to_string()),
                }),
                files: Vec::new(),
                owner: None,
                comment: None,
            }],
        };
        let task = PbsTask {
            upid: "UPID:pbs1:V".to_string(),
            node: "pbs1".to_string(),
            worker_type: "verificationjob".to_string(),
            worker_id: Some("store1:v-1".to_string()),
            user: None,
            starttime: now - 600,
            endtime: Some(now - 500),
            status: Some("failed".to_string()),
        };

        let diag = diagnose(&[datastore], &[], &[task], now, Duration::from_secs(7 * 86_400));

        let ds = &diag.datastores[0];
        assert_eq!(ds.failed_snapshots, 1);
        assert_eq!(ds.failure_categories.values().sum::<usize>(), 1);
        assert_eq!(diag.recent_failures.len(), 1);
        assert_eq!(diag.recent_failures[0].upid.as_deref(), Some("UPID:pbs1:V"));
        assert_eq!(diag.score, 100 - 30 - 10);
    }
}
