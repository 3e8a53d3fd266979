//! Reconciliation of overlapping discovery results
//!
//! Several endpoint groups may describe the same physical infrastructure.
//! The merges here collapse their readings into one canonical set:
//!
//! - nodes by name, preferring online, longer-running and better-populated
//!   readings, never losing known storage, and falling back to the
//!   last-known-good cache when nothing is online
//! - guests by `endpoint_id:vmid`, preferring the running reading
//! - storage backups by `volid`, recording every node the file is visible from

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::caching::{CachedNodeState, NodeStateCache};
use crate::types::{Guest, Node, NodeStatus, StorageBackup};

/// Node merge with last-known-good fallback
pub struct Reconciler {
    node_state: Arc<NodeStateCache>,
    transition_window: Duration,
}

impl Reconciler {
    pub fn new(node_state: Arc<NodeStateCache>, transition_window: Duration) -> Self {
        Self {
            node_state,
            transition_window,
        }
    }

    /// Merge node sightings from every group into one node per name
    pub fn merge_nodes(&self, sightings: Vec<Node>) -> Vec<Node> {
        let now_ms = Utc::now().timestamp_millis();
        let mut merged: Vec<Node> = Vec::with_capacity(sightings.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for node in sightings {
            let Some(&i) = index.get(&node.node) else {
                if node.is_online() {
                    self.remember(&node, now_ms);
                }
                index.insert(node.node.clone(), merged.len());
                merged.push(node);
                continue;
            };

            let existing = &mut merged[i];
            if should_replace(existing, &node) {
                let displaced = std::mem::replace(existing, node);
                if existing.storage.is_empty() && !displaced.storage.is_empty() {
                    existing.storage = displaced.storage.clone();
                }
                if displaced.is_online() && !existing.is_online() {
                    self.dampen(existing, now_ms);
                }
                if existing.is_online() && !existing.possible_transition {
                    self.remember(existing, now_ms);
                }
            } else if existing.storage.is_empty() && !node.storage.is_empty() {
                existing.storage = node.storage;
            }
        }

        // A settled online reading ends any transition
        for node in &merged {
            if node.is_online() && !node.possible_transition {
                self.node_state.set_transition_since(&node.node, None);
            }
        }

        if !merged.iter().any(Node::is_online) {
            self.backfill_from_cache(&mut merged, &index);
        }

        let evicted = self.node_state.cleanup_expired();
        if evicted > 0 {
            debug!(evicted, "Evicted expired node states");
        }

        merged
    }

    /// Snapshot an online reading, keeping any transition marker already set
    fn remember(&self, node: &Node, now_ms: i64) {
        let transition_since = self
            .node_state
            .get(&node.node)
            .and_then(|state| state.transition_since);
        self.node_state.insert(
            &node.node,
            CachedNodeState {
                node: node.clone(),
                cached_at: now_ms,
                transition_since,
            },
        );
    }

    /// An online node was displaced by a non-online reading
    ///
    /// Hold it online and flag the possible transition, until the conflict has
    /// lasted longer than the transition window.
    fn dampen(&self, node: &mut Node, now_ms: i64) {
        let since = self
            .node_state
            .get(&node.node)
            .and_then(|state| state.transition_since)
            .unwrap_or(now_ms);

        let window_ms = i64::try_from(self.transition_window.as_millis()).unwrap_or(i64::MAX);
        if now_ms.saturating_sub(since) >= window_ms {
            warn!(
                node = %node.node,
                since_ms = since,
                "Offline reading persisted beyond transition window, marking node offline"
            );
            return;
        }

        debug!(node = %node.node, "Conflicting offline reading, holding node online");
        node.status = NodeStatus::Online;
        node.possible_transition = true;
        node.transition_detected_at = Some(now_ms);
        self.node_state.set_transition_since(&node.node, Some(since));
    }

    fn backfill_from_cache(&self, merged: &mut Vec<Node>, index: &HashMap<String, usize>) {
        let mut restored = 0;
        for state in self.node_state.valid_states() {
            if index.contains_key(&state.node.node) {
                continue;
            }
            let mut node = state.node;
            node.status = NodeStatus::Offline;
            node.from_cache = true;
            node.cached_at = Some(state.cached_at);
            node.possible_transition = false;
            node.transition_detected_at = None;
            merged.push(node);
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "No node online, restored last-known nodes from cache");
        }
    }
}

/// Whether a new reading of a node beats the one already kept
fn should_replace(existing: &Node, candidate: &Node) -> bool {
    (candidate.is_online() && !existing.is_online())
        || (candidate.status == existing.status && candidate.uptime > existing.uptime)
        || (candidate.cpu.is_some() && existing.cpu.is_none())
}

/// Merge guests by `endpoint_id:vmid`, preferring a running reading
pub fn merge_guests(guests: Vec<Guest>) -> Vec<Guest> {
    let mut merged: Vec<Guest> = Vec::with_capacity(guests.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for guest in guests {
        match index.get(&guest.merge_key()) {
            Some(&i) => {
                if guest.is_running() && !merged[i].is_running() {
                    merged[i] = guest;
                }
            }
            None => {
                index.insert(guest.merge_key(), merged.len());
                merged.push(guest);
            }
        }
    }

    merged
}

/// Merge storage backups by `volid`, accumulating the nodes that see each file
pub fn merge_storage_backups(backups: Vec<StorageBackup>) -> Vec<StorageBackup> {
    let mut merged: Vec<StorageBackup> = Vec::with_capacity(backups.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for backup in backups {
        match index.get(&backup.volid) {
            Some(&i) => {
                let first = &mut merged[i];
                for node in std::iter::once(&backup.node).chain(backup.visible_on_nodes.iter()) {
                    if !first.visible_on_nodes.contains(node) {
                        first.visible_on_nodes.push(node.clone());
                    }
                }
            }
            None => {
                let mut backup = backup;
                if !backup.visible_on_nodes.contains(&backup.node) {
                    backup.visible_on_nodes.insert(0, backup.node.clone());
                }
                index.insert(backup.volid.clone(), merged.len());
                merged.push(backup);
            }
        }
    }

    merged
}
