//! Time-bounded caches that mask transient endpoint failures
//!
//! Four caches live across discovery cycles, each owned by one component:
//!
//! | cache                  | key                | owner                 |
//! |------------------------|--------------------|-----------------------|
//! | direct connections     | `node@endpoint`    | discovery orchestrator|
//! | cluster membership     | endpoint id        | topology resolver     |
//! | last-known-good nodes  | node name          | reconciliation layer  |
//! | guest-agent failures   | endpoint:node:vmid | metrics collector     |
//!
//! All of them are built once by [`CacheRegistry`] and injected; nothing here is
//! global, so tests construct isolated instances. Map operations go through
//! `DashMap`, which is safe under concurrent access without extra locking.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::ApiClient;
use crate::config::CacheConfig;
use crate::topology::EndpointClassification;
use crate::types::Node;

/// Cached value with insertion time
#[derive(Debug, Clone)]
struct CachedValue<T> {
    value: T,
    inserted_at: Instant,
}

impl<T> CachedValue<T> {
    fn is_valid(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// Generic cache with TTL support
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    entries: DashMap<K, CachedValue<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new TTL cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a non-expired value
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_with_age(key).map(|(value, _)| value)
    }

    /// Get a non-expired value together with when it was inserted
    pub fn get_with_age(&self, key: &K) -> Option<(V, Instant)> {
        let entry = self.entries.get(key)?;
        if entry.is_valid(self.ttl) {
            Some((entry.value.clone(), entry.inserted_at))
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Insert with an explicit insertion time
    pub fn insert_at(&self, key: K, value: V, inserted_at: Instant) {
        self.entries.insert(key, CachedValue { value, inserted_at });
    }

    /// Modify a non-expired value in place, keeping its insertion time
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_valid(self.ttl) => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    /// Invalidate a specific key
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// All non-expired entries
    pub fn valid_entries(&self) -> Vec<(K, V, Instant)> {
        self.entries
            .iter()
            .filter(|entry| entry.is_valid(self.ttl))
            .map(|entry| (entry.key().clone(), entry.value.clone(), entry.inserted_at))
            .collect()
    }

    /// Clean up expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, cached| cached.is_valid(ttl));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until the next sweep
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Tested direct connections to individual nodes, bypassing cluster routing
pub struct DirectConnectionCache {
    cache: TtlCache<String, Arc<dyn ApiClient>>,
}

impl DirectConnectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    fn key(node: &str, endpoint_id: &str) -> String {
        format!("{}@{}", node, endpoint_id)
    }

    pub fn get(&self, node: &str, endpoint_id: &str) -> Option<Arc<dyn ApiClient>> {
        self.cache.get(&Self::key(node, endpoint_id))
    }

    /// Only connections that passed a connection test belong here
    pub fn insert(&self, node: &str, endpoint_id: &str, client: Arc<dyn ApiClient>) {
        self.cache.insert(Self::key(node, endpoint_id), client);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cache.cleanup_expired()
    }
}

/// Cluster/standalone classification per endpoint
pub struct MembershipCache {
    cache: TtlCache<String, EndpointClassification>,
}

impl MembershipCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    pub fn get(&self, endpoint_id: &str) -> Option<EndpointClassification> {
        self.cache.get(&endpoint_id.to_string())
    }

    pub fn insert(&self, endpoint_id: &str, classification: EndpointClassification) {
        self.cache.insert(endpoint_id.to_string(), classification);
    }

    pub fn invalidate(&self, endpoint_id: &str) {
        self.cache.invalidate(&endpoint_id.to_string());
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cache.cleanup_expired()
    }
}

/// Snapshot of a node last seen online
#[derive(Debug, Clone)]
pub struct CachedNodeState {
    pub node: Node,
    /// Unix millis of the online reading
    pub cached_at: i64,
    /// Unix millis when a conflicting offline reading was first merged
    pub transition_since: Option<i64>,
}

/// Last-known-good node state keyed by node name
pub struct NodeStateCache {
    cache: TtlCache<String, CachedNodeState>,
}

impl NodeStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.cache.ttl()
    }

    pub fn get(&self, node_name: &str) -> Option<CachedNodeState> {
        self.cache.get(&node_name.to_string())
    }

    pub fn insert(&self, node_name: &str, state: CachedNodeState) {
        self.cache.insert(node_name.to_string(), state);
    }

    /// Insert a state that was recorded `age` ago
    pub fn insert_aged(&self, node_name: &str, state: CachedNodeState, age: Duration) {
        let now = Instant::now();
        let inserted_at = now.checked_sub(age).unwrap_or(now);
        self.cache.insert_at(node_name.to_string(), state, inserted_at);
    }

    /// Record or clear when a conflicting offline reading was first seen
    pub fn set_transition_since(&self, node_name: &str, since: Option<i64>) -> bool {
        self.cache
            .update(&node_name.to_string(), |state| state.transition_since = since)
    }

    pub fn valid_states(&self) -> Vec<CachedNodeState> {
        self.cache
            .valid_entries()
            .into_iter()
            .map(|(_, state, _)| state)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cache.cleanup_expired()
    }
}

#[derive(Debug, Clone, Copy)]
struct AgentFailure {
    count: u32,
    last_failure: Instant,
}

/// Circuit breaker for in-guest agent probes
///
/// After a failure the probe is skipped for `retry_delay`; once `max_retries`
/// failures have accumulated the skip window grows to `3 * retry_delay`.
/// Entries untouched for `idle_expiry` are dropped, allowing a fresh start.
pub struct GuestAgentTracker {
    failures: DashMap<String, AgentFailure>,
    retry_delay: Duration,
    max_retries: u32,
    idle_expiry: Duration,
}

impl GuestAgentTracker {
    pub fn new(retry_delay: Duration, max_retries: u32, idle_expiry: Duration) -> Self {
        Self {
            failures: DashMap::new(),
            retry_delay,
            max_retries,
            idle_expiry,
        }
    }

    fn key(endpoint_id: &str, node: &str, vmid: u32) -> String {
        format!("{}:{}:{}", endpoint_id, node, vmid)
    }

    pub fn should_skip(&self, endpoint_id: &str, node: &str, vmid: u32) -> bool {
        let Some(failure) = self.failures.get(&Self::key(endpoint_id, node, vmid)).map(|f| *f) else {
            return false;
        };

        let elapsed = failure.last_failure.elapsed();
        if elapsed >= self.idle_expiry {
            return false;
        }

        if failure.count >= self.max_retries {
            elapsed < self.retry_delay.saturating_mul(3)
        } else {
            elapsed < self.retry_delay
        }
    }

    pub fn record_failure(&self, endpoint_id: &str, node: &str, vmid: u32) {
        let now = Instant::now();
        let mut entry = self
            .failures
            .entry(Self::key(endpoint_id, node, vmid))
            .or_insert(AgentFailure {
                count: 0,
                last_failure: now,
            });
        entry.count = entry.count.saturating_add(1);
        entry.last_failure = now;
    }

    pub fn record_success(&self, endpoint_id: &str, node: &str, vmid: u32) {
        self.failures.remove(&Self::key(endpoint_id, node, vmid));
    }

    pub fn failure_count(&self, endpoint_id: &str, node: &str, vmid: u32) -> u32 {
        self.failures
            .get(&Self::key(endpoint_id, node, vmid))
            .map(|f| f.count)
            .unwrap_or(0)
    }

    pub fn cleanup_expired(&self) -> usize {
        let before = self.failures.len();
        let idle = self.idle_expiry;
        self.failures.retain(|_, f| f.last_failure.elapsed() < idle);
        before.saturating_sub(self.failures.len())
    }
}

/// Owner of every cross-cycle cache
pub struct CacheRegistry {
    pub direct_connections: Arc<DirectConnectionCache>,
    pub membership: Arc<MembershipCache>,
    pub node_state: Arc<NodeStateCache>,
    pub guest_agent: Arc<GuestAgentTracker>,
}

impl CacheRegistry {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            direct_connections: Arc::new(DirectConnectionCache::new(config.direct_connection_ttl)),
            membership: Arc::new(MembershipCache::new(config.membership_ttl)),
            // Same lifetime as direct connections
            node_state: Arc::new(NodeStateCache::new(config.direct_connection_ttl)),
            guest_agent: Arc::new(GuestAgentTracker::new(
                config.guest_agent_retry_delay,
                config.guest_agent_max_retries,
                config.guest_agent_idle_expiry,
            )),
        }
    }

    /// Clean up all expired cache entries
    pub fn cleanup_expired(&self) -> usize {
        self.direct_connections.cleanup_expired()
            + self.membership.cleanup_expired()
            + self.node_state.cleanup_expired()
            + self.guest_agent.cleanup_expired()
    }

    /// Sweep expired entries every `interval` until `shutdown` flips to true
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            info!("Starting cache sweeper (interval {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = registry.cleanup_expired();
                        if removed > 0 {
                            debug!(removed, "Evicted expired cache entries");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Cache sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
