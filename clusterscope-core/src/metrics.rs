//! Guest metrics collection
//!
//! One bulk `/cluster/resources` call per endpoint tells us which guests are
//! running and gives a first set of gauges. Time series are only requested for
//! guests the bulk listing reports running; current status is always fetched
//! and wins field by field over the bulk values. If the bulk call fails every
//! guest falls back to individual time-series and status calls.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Instrument};

use crate::caching::GuestAgentTracker;
use crate::client::fields::{bool_field, f64_field, str_field, u64_field};
use crate::client::{get_list, EndpointHandle, EndpointPool};
use crate::observability::log_degraded;
use crate::patterns::{partition_results, BoundedExecutor};
use crate::types::{Guest, GuestType, RrdPoint};

const RRD_TIMEFRAME: &str = "hour";

/// Live counters of a guest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestGauges {
    pub status: Option<String>,
    pub cpu: Option<f64>,
    pub cpus: Option<f64>,
    pub mem: Option<u64>,
    pub maxmem: Option<u64>,
    pub disk: Option<u64>,
    pub maxdisk: Option<u64>,
    pub uptime: Option<u64>,
    pub netin: Option<u64>,
    pub netout: Option<u64>,
    pub diskread: Option<u64>,
    pub diskwrite: Option<u64>,
}

impl GuestGauges {
    pub fn from_value(value: &Value) -> Self {
        Self {
            status: str_field(value, "status").map(str::to_string),
            cpu: f64_field(value, "cpu"),
            cpus: f64_field(value, "cpus").or_else(|| f64_field(value, "maxcpu")),
            mem: u64_field(value, "mem"),
            maxmem: u64_field(value, "maxmem"),
            disk: u64_field(value, "disk"),
            maxdisk: u64_field(value, "maxdisk"),
            uptime: u64_field(value, "uptime"),
            netin: u64_field(value, "netin"),
            netout: u64_field(value, "netout"),
            diskread: u64_field(value, "diskread"),
            diskwrite: u64_field(value, "diskwrite"),
        }
    }

    /// Field-wise merge preferring `self`
    pub fn or(self, fallback: GuestGauges) -> GuestGauges {
        GuestGauges {
            status: self.status.or(fallback.status),
            cpu: self.cpu.or(fallback.cpu),
            cpus: self.cpus.or(fallback.cpus),
            mem: self.mem.or(fallback.mem),
            maxmem: self.maxmem.or(fallback.maxmem),
            disk: self.disk.or(fallback.disk),
            maxdisk: self.maxdisk.or(fallback.maxdisk),
            uptime: self.uptime.or(fallback.uptime),
            netin: self.netin.or(fallback.netin),
            netout: self.netout.or(fallback.netout),
            diskread: self.diskread.or(fallback.diskread),
            diskwrite: self.diskwrite.or(fallback.diskwrite),
        }
    }
}

/// Metrics for one guest
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestMetrics {
    pub endpoint_id: String,
    pub vmid: u32,
    pub node: String,
    #[serde(rename = "type")]
    pub guest_type: GuestType,
    pub time_series: Vec<RrdPoint>,
    pub current: Option<GuestGauges>,
    /// In-guest memory information reported by the guest agent
    pub agent_memory: Option<Value>,
}

pub struct MetricsCollector {
    pool: Arc<EndpointPool>,
    agent_tracker: Arc<GuestAgentTracker>,
    timeout: Duration,
    concurrency: usize,
}

impl MetricsCollector {
    pub fn new(
        pool: Arc<EndpointPool>,
        agent_tracker: Arc<GuestAgentTracker>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            pool,
            agent_tracker,
            timeout,
            concurrency,
        }
    }

    /// Metrics for every running guest, endpoints in parallel
    pub async fn collect<'a, I>(&self, guests: I) -> Vec<GuestMetrics>
    where
        I: IntoIterator<Item = &'a Guest>,
    {
        let mut by_endpoint: BTreeMap<&str, Vec<&Guest>> = BTreeMap::new();
        for guest in guests.into_iter().filter(|g| g.is_running()) {
            by_endpoint.entry(guest.endpoint_id.as_str()).or_default().push(guest);
        }

        let collections = by_endpoint.into_iter().filter_map(|(endpoint_id, guests)| {
            let handle = self.pool.pve(endpoint_id)?;
            let span = tracing::debug_span!("guest_metrics", endpoint = %endpoint_id);
            Some(self.collect_endpoint(handle, guests).instrument(span))
        });

        join_all(collections).await.into_iter().flatten().collect()
    }

    async fn collect_endpoint(&self, handle: &EndpointHandle, guests: Vec<&Guest>) -> Vec<GuestMetrics> {
        let endpoint_id = handle.config.id.as_str();
        let executor = BoundedExecutor::new(self.concurrency);

        let results = match get_list(handle.client.as_ref(), "/cluster/resources?type=vm", self.timeout).await {
            Ok(entries) => {
                let bulk = index_bulk(entries);
                debug!(guests = guests.len(), indexed = bulk.len(), "Using bulk resource listing");
                executor
                    .run_all(guests, |guest| {
                        let entry = bulk.get(&(guest.node.clone(), guest.vmid));
                        async move { Ok(self.guest_from_bulk(handle, guest, entry).await) }
                    })
                    .await
            }
            Err(e) => {
                log_degraded(&e, endpoint_id, "bulk resource listing; falling back to per-guest calls");
                executor
                    .run_all(guests, |guest| async move { Ok(self.guest_individually(handle, guest).await) })
                    .await
            }
        };

        let (metrics, errors) = partition_results(results);
        for e in &errors {
            log_degraded(e, endpoint_id, "guest metrics");
        }
        metrics
    }

    async fn guest_from_bulk(
        &self,
        handle: &EndpointHandle,
        guest: &Guest,
        bulk: Option<&Value>,
    ) -> GuestMetrics {
        // Stopped guests reject time-series requests
        let running = bulk.map_or(false, |entry| str_field(entry, "status") == Some("running"));

        let (time_series, current) = tokio::join!(
            async {
                if running {
                    self.time_series(handle, guest).await
                } else {
                    Vec::new()
                }
            },
            self.current_status(handle, guest),
        );

        let bulk_gauges = bulk.map(GuestGauges::from_value);
        let gauges = match (current.as_ref().map(GuestGauges::from_value), bulk_gauges) {
            (Some(fresh), Some(bulk)) => Some(fresh.or(bulk)),
            (fresh, bulk) => fresh.or(bulk),
        };

        self.finish(handle, guest, time_series, gauges, current.as_ref()).await
    }

    async fn guest_individually(&self, handle: &EndpointHandle, guest: &Guest) -> GuestMetrics {
        let (time_series, current) = tokio::join!(
            self.time_series(handle, guest),
            self.current_status(handle, guest),
        );
        let gauges = current.as_ref().map(GuestGauges::from_value);
        self.finish(handle, guest, time_series, gauges, current.as_ref()).await
    }

    async fn finish(
        &self,
        handle: &EndpointHandle,
        guest: &Guest,
        time_series: Vec<RrdPoint>,
        current: Option<GuestGauges>,
        raw_status: Option<&Value>,
    ) -> GuestMetrics {
        let agent_enabled = guest.agent_enabled || raw_status.map_or(false, |s| bool_field(s, "agent"));
        let agent_memory = if agent_enabled && guest.guest_type == GuestType::Qemu {
            self.agent_memory(handle, guest).await
        } else {
            None
        };

        GuestMetrics {
            endpoint_id: guest.endpoint_id.clone(),
            vmid: guest.vmid,
            node: guest.node.clone(),
            guest_type: guest.guest_type,
            time_series,
            current,
            agent_memory,
        }
    }

    async fn time_series(&self, handle: &EndpointHandle, guest: &Guest) -> Vec<RrdPoint> {
        let path = format!(
            "/nodes/{}/{}/{}/rrddata?timeframe={}&cf=AVERAGE",
            guest.node,
            guest.guest_type.api_segment(),
            guest.vmid,
            RRD_TIMEFRAME
        );
        match get_list(handle.client.as_ref(), &path, self.timeout).await {
            Ok(points) => points
                .into_iter()
                .filter_map(|point| match point {
                    Value::Object(map) => Some(map.into_iter().collect::<RrdPoint>()),
                    _ => None,
                })
                .collect(),
            Err(e) => {
                log_degraded(&e, &handle.config.id, &format!("time series of guest {}", guest.vmid));
                Vec::new()
            }
        }
    }

    async fn current_status(&self, handle: &EndpointHandle, guest: &Guest) -> Option<Value> {
        let path = format!(
            "/nodes/{}/{}/{}/status/current",
            guest.node,
            guest.guest_type.api_segment(),
            guest.vmid
        );
        match handle.client.get(&path, self.timeout).await {
            Ok(status) => Some(status),
            Err(e) => {
                log_degraded(&e, &handle.config.id, &format!("current status of guest {}", guest.vmid));
                None
            }
        }
    }

    /// In-guest memory probe, gated by the guest-agent circuit breaker
    async fn agent_memory(&self, handle: &EndpointHandle, guest: &Guest) -> Option<Value> {
        let endpoint_id = handle.config.id.as_str();
        if self.agent_tracker.should_skip(endpoint_id, &guest.node, guest.vmid) {
            debug!(node = %guest.node, vmid = guest.vmid, "Guest agent recently failed, skipping probe");
            return None;
        }

        let path = format!(
            "/nodes/{}/qemu/{}/agent/get-memory-block-info",
            guest.node, guest.vmid
        );
        match handle.client.get(&path, self.timeout).await {
            Ok(info) => {
                self.agent_tracker.record_success(endpoint_id, &guest.node, guest.vmid);
                Some(info)
            }
            Err(e) => {
                self.agent_tracker.record_failure(endpoint_id, &guest.node, guest.vmid);
                debug!(
                    node = %guest.node,
                    vmid = guest.vmid,
                    failures = self.agent_tracker.failure_count(endpoint_id, &guest.node, guest.vmid),
                    error = %e,
                    "Guest agent probe failed"
                );
                None
            }
        }
    }
}

/// Bulk listing entries keyed by `(node, vmid)`
fn index_bulk(entries: Vec<Value>) -> HashMap<(String, u32), Value> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let node = str_field(&entry, "node")?.to_string();
            let vmid = u64_field(&entry, "vmid")? as u32;
            Some(((node, vmid), entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_gauges_win_field_by_field() {
        let fresh = GuestGauges::from_value(&json!({"uptime": 500, "netin": 10}));
        let bulk = GuestGauges::from_value(&json!({"uptime": 400, "netin": 5, "maxmem": 2048, "status": "running"}));

        let merged = fresh.or(bulk);
        assert_eq!(merged.uptime, Some(500));
        assert_eq!(merged.netin, Some(10));
        assert_eq!(merged.maxmem, Some(2048));
        assert_eq!(merged.status.as_deref(), Some("running"));
    }

    #[test]
    fn test_bulk_index_keys() {
        let index = index_bulk(vec![
            json!({"node": "n1", "vmid": 100, "status": "running"}),
            json!({"node": "n2", "vmid": "101", "status": "stopped"}),
            json!({"vmid": 102}),
        ]);
        assert_eq!(index.len(), 2);
        assert!(index.contains_key(&("n2".to_string(), 101)));
    }
}
