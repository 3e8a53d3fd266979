//! Discovery cycle engine
//!
//! Wires the components together for one cycle: topology resolution, then
//! per-group discovery (with hypervisor-side backups) running alongside the
//! archive-server aggregation, then reconciliation and guest metrics.
//!
//! A cycle never fails. The worst case is a result with empty collections.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, Instrument, Span};

use crate::backup::{BackupAggregator, PbsInstance};
use crate::caching::CacheRegistry;
use crate::client::{DirectConnector, EndpointPool, HttpDirectConnector};
use crate::config::Config;
use crate::discovery::DiscoveryOrchestrator;
use crate::error::ClusterscopeResult;
use crate::metrics::{GuestMetrics, MetricsCollector};
use crate::observability::cycle_span;
use crate::reconciliation::{merge_guests, merge_storage_backups, Reconciler};
use crate::topology::TopologyResolver;
use crate::types::{
    AggregatedTaskSummary, EndpointGroup, GroupDiscovery, Guest, Node, PbsTask, PveBackups,
};

/// Bookkeeping about one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub cycle: u64,
    pub duration_ms: u64,
    pub groups: usize,
    pub groups_served: usize,
    pub groups_without_data: Vec<String>,
}

/// Aggregate result of one discovery cycle
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// Wall-clock completion time, milliseconds since the epoch
    pub timestamp: i64,
    pub nodes: Vec<Node>,
    pub vms: Vec<Guest>,
    pub containers: Vec<Guest>,
    pub pbs: Vec<PbsInstance>,
    pub pve_backups: PveBackups,
    pub all_pbs_tasks: Vec<PbsTask>,
    pub aggregated_pbs_task_summary: AggregatedTaskSummary,
    pub metrics: Vec<GuestMetrics>,
    pub cycle_stats: CycleStats,
}

pub struct DiscoveryEngine {
    pool: Arc<EndpointPool>,
    caches: Arc<CacheRegistry>,
    topology: TopologyResolver,
    orchestrator: DiscoveryOrchestrator,
    reconciler: Reconciler,
    backups: BackupAggregator,
    metrics: MetricsCollector,
    pve_task_limit: usize,
    cycles: AtomicU64,
}

impl DiscoveryEngine {
    pub fn new(
        config: &Config,
        pool: Arc<EndpointPool>,
        caches: Arc<CacheRegistry>,
        connector: Arc<dyn DirectConnector>,
    ) -> Self {
        let discovery = &config.discovery;
        Self {
            topology: TopologyResolver::new(Arc::clone(&caches.membership), discovery.discovery_timeout),
            orchestrator: DiscoveryOrchestrator::new(
                Arc::clone(&pool),
                Arc::clone(&caches.direct_connections),
                connector,
                discovery.clone(),
            ),
            reconciler: Reconciler::new(Arc::clone(&caches.node_state), discovery.transition_window),
            backups: BackupAggregator::with_defaults(config.backup.clone(), discovery),
            metrics: MetricsCollector::new(
                Arc::clone(&pool),
                Arc::clone(&caches.guest_agent),
                discovery.resource_timeout,
                discovery.metrics_concurrency,
            ),
            pve_task_limit: config.backup.pve_task_limit as usize,
            cycles: AtomicU64::new(0),
            pool,
            caches,
        }
    }

    /// Engine with HTTP clients and fresh caches built from `config`
    pub fn from_config(config: &Config) -> ClusterscopeResult<Self> {
        let pool = Arc::new(EndpointPool::from_config(config)?);
        let caches = Arc::new(CacheRegistry::new(&config.cache));
        let connector = Arc::new(HttpDirectConnector::new(config.retry.clone()));
        Ok(Self::new(config, pool, caches, connector))
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Run one full discovery cycle
    pub async fn run_cycle(&self) -> DiscoveryResult {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let span = cycle_span(cycle);

        async move {
            let started = Instant::now();
            let groups = self.topology.resolve(&self.pool).await;

            let (served, pbs) = tokio::join!(
                join_all(groups.iter().map(|group| self.discover_group(group))),
                self.backups.aggregate_all(&self.pool),
            );

            let mut stats = CycleStats {
                cycle,
                groups: groups.len(),
                ..CycleStats::default()
            };

            let mut nodes = Vec::new();
            let mut vms = Vec::new();
            let mut containers = Vec::new();
            let mut pve_backups = PveBackups::default();

            for (group, (discovery, backups)) in groups.iter().zip(served) {
                if discovery.source_endpoint.is_some() {
                    stats.groups_served += 1;
                } else {
                    stats.groups_without_data.push(group.cluster_id.clone());
                }
                nodes.extend(discovery.nodes);
                vms.extend(discovery.vms);
                containers.extend(discovery.containers);
                pve_backups.extend(backups);
            }

            let nodes = self.reconciler.merge_nodes(nodes);
            let vms = merge_guests(vms);
            let containers = merge_guests(containers);
            pve_backups.storage_backups = merge_storage_backups(pve_backups.storage_backups);

            let metrics = self.metrics.collect(vms.iter().chain(containers.iter())).await;

            let all_pbs_tasks: Vec<PbsTask> = pbs.iter().flat_map(|instance| instance.tasks.iter().cloned()).collect();
            let aggregated_pbs_task_summary = summarize_tasks(&all_pbs_tasks);

            stats.duration_ms = started.elapsed().as_millis() as u64;
            Span::current().record("duration_ms", stats.duration_ms);
            info!(
                nodes = nodes.len(),
                vms = vms.len(),
                containers = containers.len(),
                pbs_instances = pbs.len(),
                groups_served = stats.groups_served,
                groups = stats.groups,
                "Discovery cycle complete"
            );

            DiscoveryResult {
                timestamp: Utc::now().timestamp_millis(),
                nodes,
                vms,
                containers,
                pbs,
                pve_backups,
                all_pbs_tasks,
                aggregated_pbs_task_summary,
                metrics,
                cycle_stats: stats,
            }
        }
        .instrument(span)
        .await
    }

    async fn discover_group(&self, group: &EndpointGroup) -> (GroupDiscovery, PveBackups) {
        let discovery = self.orchestrator.fetch_from_endpoint_group(group).await;
        let guests: Vec<Guest> = discovery
            .vms
            .iter()
            .chain(discovery.containers.iter())
            .cloned()
            .collect();
        let backups = self
            .orchestrator
            .collect_backups(
                discovery.source_endpoint.as_deref(),
                &discovery.nodes,
                &guests,
                self.pve_task_limit,
            )
            .await;
        (discovery, backups)
    }
}

/// Outcome counts over every archive-server task
pub fn summarize_tasks(tasks: &[PbsTask]) -> AggregatedTaskSummary {
    AggregatedTaskSummary {
        total: tasks.len(),
        ok: tasks.iter().filter(|t| t.is_ok()).count(),
        failed: tasks.iter().filter(|t| t.is_failed()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cycle_without_endpoints_is_structurally_complete() {
        let config = Config::default();
        let engine = DiscoveryEngine::new(
            &config,
            Arc::new(EndpointPool::new()),
            Arc::new(CacheRegistry::new(&config.cache)),
            Arc::new(HttpDirectConnector::default()),
        );

        let result = engine.run_cycle().await;
        assert!(result.nodes.is_empty());
        assert!(result.pbs.is_empty());
        assert_eq!(result.cycle_stats.cycle, 1);
        assert_eq!(result.aggregated_pbs_task_summary, AggregatedTaskSummary::default());

        let json = serde_json::to_value(&result).unwrap();
        for key in ["nodes", "vms", "containers", "pbs", "pveBackups", "allPbsTasks", "aggregatedPbsTaskSummary"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(engine.run_cycle().await.cycle_stats.cycle, 2);
    }
}
