//! Guest metrics collection: bulk path, per-guest fallback and the guest-agent
//! circuit breaker

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use clusterscope_core::caching::GuestAgentTracker;
use clusterscope_core::discovery::parse::guest_from_entry;
use clusterscope_core::metrics::MetricsCollector;
use clusterscope_core::types::{Guest, GuestType};

mod common;
use common::{pool, MockApiClient};

const RETRY_DELAY: Duration = Duration::from_secs(300);
const AGENT_PATH: &str = "/nodes/pve1/qemu/100/agent/get-memory-block-info";

fn guest(vmid: u32, status: &str, agent: bool) -> Guest {
    guest_from_entry(
        &json!({"vmid": vmid, "name": format!("vm{}", vmid), "status": status, "agent": agent as u8}),
        "A",
        "pve1",
        GuestType::Qemu,
    )
    .unwrap()
}

fn rrd_path(vmid: u32) -> String {
    format!("/nodes/pve1/qemu/{}/rrddata?timeframe=hour&cf=AVERAGE", vmid)
}

fn status_path(vmid: u32) -> String {
    format!("/nodes/pve1/qemu/{}/status/current", vmid)
}

fn collector(client: &Arc<MockApiClient>, tracker: Arc<GuestAgentTracker>) -> MetricsCollector {
    MetricsCollector::new(pool(&[("A", client)], &[]), tracker, Duration::from_millis(200), 4)
}

fn tracker() -> Arc<GuestAgentTracker> {
    Arc::new(GuestAgentTracker::new(RETRY_DELAY, 3, Duration::from_secs(1800)))
}

#[tokio::test]
async fn test_bulk_listing_gates_time_series() {
    let client = Arc::new(
        MockApiClient::new("a")
            .respond(
                "/cluster/resources?type=vm",
                json!([
                    {"node": "pve1", "vmid": 100, "status": "running", "uptime": 400, "maxmem": 2048},
                    {"node": "pve1", "vmid": 101, "status": "stopped", "maxmem": 1024}
                ]),
            )
            .respond(&rrd_path(100), json!([{"time": 1700000000, "cpu": 0.1}, {"time": 1700000060, "cpu": 0.2}]))
            .respond(&status_path(100), json!({"status": "running", "uptime": 500}))
            .respond(&status_path(101), json!({"status": "stopped"})),
    );
    let collector = collector(&client, tracker());

    let guests = vec![guest(100, "running", false), guest(101, "running", false), guest(102, "stopped", false)];
    let metrics = collector.collect(&guests).await;

    assert_eq!(metrics.len(), 2);
    let m100 = metrics.iter().find(|m| m.vmid == 100).unwrap();
    assert_eq!(m100.time_series.len(), 2);
    let current = m100.current.as_ref().unwrap();
    assert_eq!(current.uptime, Some(500));
    assert_eq!(current.maxmem, Some(2048));

    let m101 = metrics.iter().find(|m| m.vmid == 101).unwrap();
    assert!(m101.time_series.is_empty());
    assert_eq!(client.call_count(&rrd_path(101)), 0);
    assert!(!client.called_with_prefix("/nodes/pve1/qemu/102/"));
    assert_eq!(client.call_count("/cluster/resources?type=vm"), 1);
}

#[tokio::test]
async fn test_failed_bulk_listing_falls_back_per_guest() {
    let client = Arc::new(
        MockApiClient::new("a")
            .refuse("/cluster/resources?type=vm")
            .respond(&rrd_path(100), json!([{"time": 1700000000, "cpu": 0.1}]))
            .respond(&status_path(100), json!({"status": "running", "uptime": 500})),
    );
    let collector = collector(&client, tracker());

    let metrics = collector.collect(&[guest(100, "running", false)]).await;

    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].time_series.len(), 1);
    assert_eq!(metrics[0].current.as_ref().and_then(|c| c.uptime), Some(500));
    assert_eq!(client.call_count(&rrd_path(100)), 1);
}

#[tokio::test]
async fn test_agent_memory_reported_when_probe_succeeds() {
    let client = Arc::new(
        MockApiClient::new("a")
            .respond("/cluster/resources?type=vm", json!([{"node": "pve1", "vmid": 100, "status": "running"}]))
            .respond(&status_path(100), json!({"status": "running"}))
            .respond(AGENT_PATH, json!({"size": 134217728})),
    );
    let tracker = tracker();
    let collector = collector(&client, Arc::clone(&tracker));

    let metrics = collector.collect(&[guest(100, "running", true)]).await;

    assert_eq!(metrics[0].agent_memory, Some(json!({"size": 134217728})));
    assert_eq!(tracker.failure_count("A", "pve1", 100), 0);
}

#[tokio::test(start_paused = true)]
async fn test_agent_probe_backs_off_after_repeated_failures() {
    let client = Arc::new(
        MockApiClient::new("a")
            .respond("/cluster/resources?type=vm", json!([{"node": "pve1", "vmid": 100, "status": "running"}]))
            .respond(&status_path(100), json!({"status": "running"}))
            .refuse(AGENT_PATH),
    );
    let tracker = tracker();
    let collector = collector(&client, Arc::clone(&tracker));
    let guests = vec![guest(100, "running", true)];
    let step = RETRY_DELAY + Duration::from_secs(1);

    // Each failure below the retry limit blocks the probe for one delay
    for expected in 1..=3 {
        collector.collect(&guests).await;
        assert_eq!(client.call_count(AGENT_PATH), expected);
        collector.collect(&guests).await;
        assert_eq!(client.call_count(AGENT_PATH), expected);
        tokio::time::advance(step).await;
    }
    assert_eq!(tracker.failure_count("A", "pve1", 100), 3);

    // At the limit the window triples
    collector.collect(&guests).await;
    assert_eq!(client.call_count(AGENT_PATH), 3);
    tokio::time::advance(RETRY_DELAY).await;
    collector.collect(&guests).await;
    assert_eq!(client.call_count(AGENT_PATH), 3);

    tokio::time::advance(RETRY_DELAY).await;
    collector.collect(&guests).await;
    assert_eq!(client.call_count(AGENT_PATH), 4);
}
