//! Node merge properties and last-known-good fallback

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use clusterscope_core::caching::{CachedNodeState, NodeStateCache};
use clusterscope_core::reconciliation::Reconciler;
use clusterscope_core::types::{Node, NodeStatus, StorageInfo};

const NODE_STATE_TTL: Duration = Duration::from_secs(10 * 60);

fn reconciler() -> Reconciler {
    Reconciler::new(Arc::new(NodeStateCache::new(NODE_STATE_TTL)), Duration::from_secs(300))
}

fn storage(name: &str) -> StorageInfo {
    StorageInfo {
        storage: name.to_string(),
        storage_type: "dir".to_string(),
        content: "images,backup".to_string(),
        shared: false,
        enabled: true,
        active: true,
        total: 100,
        used: 10,
        avail: 90,
    }
}

fn node(endpoint: &str, name: &str, status: NodeStatus, uptime: u64, cpu: Option<f64>, storage_names: &[String]) -> Node {
    let mut node = Node::offline(endpoint, name, name.to_string());
    node.status = status;
    node.uptime = uptime;
    node.cpu = cpu;
    node.storage = storage_names.iter().map(|s| storage(s)).collect();
    node
}

fn status_strategy() -> impl Strategy<Value = NodeStatus> {
    prop_oneof![
        Just(NodeStatus::Online),
        Just(NodeStatus::Offline),
        Just(NodeStatus::Unknown),
    ]
}

fn not_online_strategy() -> impl Strategy<Value = NodeStatus> {
    prop_oneof![Just(NodeStatus::Offline), Just(NodeStatus::Unknown)]
}

fn storage_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{3,8}", 0..3)
}

fn node_strategy(name: String) -> impl Strategy<Value = Node> {
    (
        "[a-c]",
        status_strategy(),
        0u64..100_000,
        prop::option::of(0.0f64..1.0),
        storage_strategy(),
    )
        .prop_map(move |(endpoint, status, uptime, cpu, storage)| node(&endpoint, &name, status, uptime, cpu, &storage))
}

fn distinct_nodes_strategy() -> impl Strategy<Value = Vec<Node>> {
    prop::collection::btree_set("n[0-9]{1,2}", 1..8).prop_flat_map(|names| {
        names
            .into_iter()
            .map(node_strategy)
            .collect::<Vec<_>>()
    })
}

proptest! {
    #[test]
    fn test_merge_with_itself_is_idempotent(nodes in distinct_nodes_strategy()) {
        let once = reconciler().merge_nodes(nodes.clone());

        let mut doubled = nodes.clone();
        doubled.extend(nodes);
        let twice = reconciler().merge_nodes(doubled);

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_online_reading_wins_and_storage_survives(
        online_first in any::<bool>(),
        other_status in not_online_strategy(),
        online_uptime in 0u64..100_000,
        other_uptime in 0u64..100_000,
        online_cpu in prop::option::of(0.0f64..1.0),
        other_cpu in prop::option::of(0.0f64..1.0),
        online_storage in storage_strategy(),
        other_storage in storage_strategy(),
    ) {
        let online = node("a", "pve1", NodeStatus::Online, online_uptime, online_cpu, &online_storage);
        let other = node("b", "pve1", other_status, other_uptime, other_cpu, &other_storage);
        let sightings = if online_first { vec![online, other] } else { vec![other, online] };

        let merged = reconciler().merge_nodes(sightings);

        prop_assert_eq!(merged.len(), 1);
        prop_assert_eq!(merged[0].status, NodeStatus::Online);
        if !online_storage.is_empty() || !other_storage.is_empty() {
            prop_assert!(!merged[0].storage.is_empty());
        }
    }
}

#[test]
fn test_stale_cluster_falls_back_to_cached_nodes() {
    let cache = Arc::new(NodeStateCache::new(NODE_STATE_TTL));
    let reconciler = Reconciler::new(Arc::clone(&cache), Duration::from_secs(300));

    let two_minutes = Duration::from_secs(120);
    let cached_at = chrono::Utc::now().timestamp_millis() - two_minutes.as_millis() as i64;
    cache.insert_aged(
        "n1",
        CachedNodeState {
            node: node("a", "n1", NodeStatus::Online, 5000, Some(0.2), &["local".to_string()]),
            cached_at,
            transition_since: None,
        },
        two_minutes,
    );

    let merged = reconciler.merge_nodes(vec![
        node("a", "n2", NodeStatus::Offline, 0, None, &[]),
        node("a", "n3", NodeStatus::Offline, 0, None, &[]),
    ]);

    assert_eq!(merged.len(), 3);
    let n1 = merged.iter().find(|n| n.node == "n1").unwrap();
    assert_eq!(n1.status, NodeStatus::Offline);
    assert!(n1.from_cache);
    assert_eq!(n1.cached_at, Some(cached_at));
    assert_eq!(n1.storage.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_cache_entry_is_not_restored() {
    let cache = Arc::new(NodeStateCache::new(NODE_STATE_TTL));
    let reconciler = Reconciler::new(Arc::clone(&cache), Duration::from_secs(300));

    cache.insert(
        "n1",
        CachedNodeState {
            node: node("a", "n1", NodeStatus::Online, 5000, None, &[]),
            cached_at: 0,
            transition_since: None,
        },
    );
    tokio::time::advance(Duration::from_secs(11 * 60)).await;

    let merged = reconciler.merge_nodes(vec![node("a", "n2", NodeStatus::Offline, 0, None, &[])]);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].node, "n2");
    assert!(cache.is_empty());
}
