//! Cluster topology resolution
//!
//! Classifies every hypervisor endpoint as a cluster member or a standalone
//! host and turns the classification into failover groups. Endpoints that
//! report the same cluster name are assumed to describe the same physical
//! cluster; within a group the healthy endpoints come first.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::caching::MembershipCache;
use crate::client::fields::{str_field, u64_field};
use crate::client::{get_list, EndpointHandle, EndpointPool};
use crate::types::{EndpointGroup, GroupKind};

/// How one endpoint classified itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointClassification {
    pub kind: GroupKind,
    pub cluster_name: Option<String>,
    /// The cluster-status query failed and `kind` is a fallback
    pub error: bool,
}

impl EndpointClassification {
    pub fn standalone(error: bool) -> Self {
        Self {
            kind: GroupKind::Standalone,
            cluster_name: None,
            error,
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            kind: GroupKind::Cluster,
            cluster_name: Some(name.into()),
            error: false,
        }
    }

    /// Classify from a `/cluster/status` listing
    ///
    /// A `cluster` entry with more than one node makes the endpoint a cluster
    /// member; anything else is standalone.
    pub fn from_cluster_status(entries: &[Value]) -> Self {
        entries
            .iter()
            .find(|entry| str_field(entry, "type") == Some("cluster"))
            .filter(|cluster| u64_field(cluster, "nodes").unwrap_or(0) > 1)
            .and_then(|cluster| str_field(cluster, "name"))
            .map(Self::cluster)
            .unwrap_or_else(|| Self::standalone(false))
    }
}

/// Resolves endpoint groups, caching successful classifications
pub struct TopologyResolver {
    membership: Arc<MembershipCache>,
    timeout: Duration,
}

impl TopologyResolver {
    pub fn new(membership: Arc<MembershipCache>, timeout: Duration) -> Self {
        Self {
            membership,
            timeout,
        }
    }

    /// Classify one endpoint, reusing a cached classification when present
    pub async fn classify(&self, handle: &EndpointHandle) -> EndpointClassification {
        let endpoint_id = handle.config.id.as_str();

        if let Some(cached) = self.membership.get(endpoint_id) {
            debug!(endpoint = %endpoint_id, "Using cached cluster membership");
            return cached;
        }

        match get_list(handle.client.as_ref(), "/cluster/status", self.timeout).await {
            Ok(entries) => {
                let classification = EndpointClassification::from_cluster_status(&entries);
                self.membership.insert(endpoint_id, classification.clone());
                classification
            }
            Err(e) => {
                warn!(
                    endpoint = %endpoint_id,
                    error = %e,
                    "Cluster status query failed, treating endpoint as standalone"
                );
                EndpointClassification::standalone(true)
            }
        }
    }

    /// Classify every hypervisor endpoint of `pool` concurrently and group them
    pub async fn resolve(&self, pool: &EndpointPool) -> Vec<EndpointGroup> {
        let handles: Vec<&EndpointHandle> = pool.pve_endpoints().collect();
        let classifications = join_all(handles.iter().map(|h| self.classify(h))).await;

        let classified: Vec<(String, EndpointClassification)> = handles
            .iter()
            .map(|h| h.config.id.clone())
            .zip(classifications)
            .collect();

        let groups = build_groups(classified);
        info!(
            groups = groups.len(),
            clusters = groups.iter().filter(|g| g.is_cluster()).count(),
            "Resolved endpoint topology"
        );
        groups
    }
}

/// Turn per-endpoint classifications into failover groups
///
/// Cluster groups come first ordered by cluster name, then one group per
/// standalone endpoint ordered by endpoint id.
pub fn build_groups(classified: Vec<(String, EndpointClassification)>) -> Vec<EndpointGroup> {
    let mut clusters: BTreeMap<String, Vec<(String, bool)>> = BTreeMap::new();
    let mut standalone: Vec<String> = Vec::new();

    for (endpoint_id, classification) in classified {
        match (classification.kind, classification.cluster_name) {
            (GroupKind::Cluster, Some(name)) => clusters
                .entry(name)
                .or_default()
                .push((endpoint_id, classification.error)),
            _ => standalone.push(endpoint_id),
        }
    }

    let mut groups = Vec::with_capacity(clusters.len() + standalone.len());

    for (cluster_id, mut members) in clusters {
        // Errored endpoints last, then by id
        members.sort_by(|(a_id, a_err), (b_id, b_err)| a_err.cmp(b_err).then_with(|| a_id.cmp(b_id)));
        let mut ids = members.into_iter().map(|(id, _)| id);
        let Some(primary) = ids.next() else {
            continue;
        };
        groups.push(EndpointGroup {
            kind: GroupKind::Cluster,
            cluster_id,
            primary_endpoint_id: primary,
            backup_endpoint_ids: ids.collect(),
        });
    }

    standalone.sort();
    groups.extend(standalone.iter().map(|id| EndpointGroup::standalone(id)));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification_from_cluster_status() {
        let clustered = vec![
            json!({"type": "cluster", "name": "prod", "nodes": 3, "quorate": 1}),
            json!({"type": "node", "name": "pve1", "online": 1}),
        ];
        assert_eq!(
            EndpointClassification::from_cluster_status(&clustered),
            EndpointClassification::cluster("prod")
        );

        let single = vec![json!({"type": "cluster", "name": "lab", "nodes": 1})];
        assert_eq!(
            EndpointClassification::from_cluster_status(&single),
            EndpointClassification::standalone(false)
        );

        let bare = vec![json!({"type": "node", "name": "pve1", "online": 1})];
        assert_eq!(
            EndpointClassification::from_cluster_status(&bare).kind,
            GroupKind::Standalone
        );
    }

    #[test]
    fn test_build_groups_orders_errored_endpoints_last() {
        let mut errored = EndpointClassification::cluster("prod");
        errored.error = true;

        let groups = build_groups(vec![
            ("c".to_string(), EndpointClassification::cluster("prod")),
            ("a".to_string(), errored),
            ("b".to_string(), EndpointClassification::cluster("prod")),
            ("solo".to_string(), EndpointClassification::standalone(true)),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].cluster_id, "prod");
        assert_eq!(groups[0].primary_endpoint_id, "b");
        assert_eq!(groups[0].backup_endpoint_ids, vec!["c".to_string(), "a".to_string()]);
        assert_eq!(groups[1], EndpointGroup::standalone("solo"));
    }
}
