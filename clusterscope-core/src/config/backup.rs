//! Backup aggregation configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Snapshots older than this are not turned into backup runs
    pub retention_days: u32,

    /// Window in which verification failures count as "recent"
    #[serde(with = "humantime_serde")]
    pub verification_lookback: Duration,

    /// Maximum archive-server tasks requested per instance
    pub pbs_task_limit: u32,

    /// Maximum vzdump tasks requested per hypervisor node
    pub pve_task_limit: u32,

    /// Number of tasks kept in each instance's recent task list
    pub recent_task_count: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            verification_lookback: DEFAULT_VERIFICATION_LOOKBACK,
            pbs_task_limit: DEFAULT_PBS_TASK_LIMIT,
            pve_task_limit: DEFAULT_PVE_TASK_LIMIT,
            recent_task_count: DEFAULT_RECENT_TASK_COUNT,
        }
    }
}

impl BackupConfig {
    pub fn retention_secs(&self) -> i64 {
        i64::from(self.retention_days) * 24 * 60 * 60
    }
}
