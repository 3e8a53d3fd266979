//! Topology resolution against scripted endpoints

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use clusterscope_core::caching::MembershipCache;
use clusterscope_core::topology::{EndpointClassification, TopologyResolver};
use clusterscope_core::types::{EndpointGroup, GroupKind};

mod common;
use common::{pool, MockApiClient};

const STATUS: &str = "/cluster/status";

fn cluster_member(name: &str) -> MockApiClient {
    MockApiClient::new(name).respond(
        STATUS,
        json!([
            {"type": "cluster", "name": "prod", "nodes": 3},
            {"type": "node", "name": "pve1", "online": 1}
        ]),
    )
}

fn resolver() -> (TopologyResolver, Arc<MembershipCache>) {
    let membership = Arc::new(MembershipCache::new(Duration::from_secs(1800)));
    let resolver = TopologyResolver::new(Arc::clone(&membership), Duration::from_millis(200));
    (resolver, membership)
}

#[tokio::test]
async fn test_shared_cluster_name_forms_one_group() {
    let a = Arc::new(cluster_member("a"));
    let b = Arc::new(cluster_member("b"));
    let c = Arc::new(MockApiClient::new("c").refuse(STATUS));
    let pool = pool(&[("B", &b), ("C", &c), ("A", &a)], &[]);
    let (resolver, _) = resolver();

    let groups = resolver.resolve(&pool).await;

    assert_eq!(
        groups,
        vec![
            EndpointGroup {
                kind: GroupKind::Cluster,
                cluster_id: "prod".to_string(),
                primary_endpoint_id: "A".to_string(),
                backup_endpoint_ids: vec!["B".to_string()],
            },
            EndpointGroup::standalone("C"),
        ]
    );
}

#[tokio::test]
async fn test_successful_classification_is_cached_and_failure_is_not() {
    let a = Arc::new(cluster_member("a"));
    let c = Arc::new(MockApiClient::new("c").refuse(STATUS));
    let pool = pool(&[("A", &a), ("C", &c)], &[]);
    let (resolver, membership) = resolver();

    resolver.resolve(&pool).await;

    assert_eq!(membership.get("A"), Some(EndpointClassification::cluster("prod")));
    assert_eq!(membership.get("C"), None);

    resolver.resolve(&pool).await;

    assert_eq!(a.call_count(STATUS), 1);
    assert_eq!(c.call_count(STATUS), 2);
}

#[tokio::test]
async fn test_failed_query_falls_back_to_standalone_with_error() {
    let c = Arc::new(MockApiClient::new("c").refuse(STATUS));
    let pool = pool(&[("C", &c)], &[]);
    let (resolver, _) = resolver();

    let classification = resolver.classify(pool.pve("C").unwrap()).await;

    assert_eq!(classification, EndpointClassification::standalone(true));
}

#[tokio::test]
async fn test_cached_classification_skips_query() {
    let a = Arc::new(MockApiClient::new("a"));
    let pool = pool(&[("A", &a)], &[]);
    let (resolver, membership) = resolver();
    membership.insert("A", EndpointClassification::cluster("prod"));

    let classification = resolver.classify(pool.pve("A").unwrap()).await;

    assert_eq!(classification, EndpointClassification::cluster("prod"));
    assert_eq!(a.call_count(STATUS), 0);
}
