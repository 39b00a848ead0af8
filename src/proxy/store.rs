//! Validated proxy store
//!
//! Readers take lock-free snapshots; only the refresh task writes, so a merge is a
//! plain load-compute-store.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::seq::SliceRandom;
use tracing::info;

use crate::models::{PoolStats, ProxyEndpoint};

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<ProxyEndpoint>,
    self_managed: Vec<ProxyEndpoint>,
    last_updated: f64,
}

/// Deduplicated, capped set of live endpoints plus the trusted self-managed subset
pub struct ProxyPool {
    state: ArcSwap<PoolState>,
    cap: usize,
    min_healthy: usize,
}

impl ProxyPool {
    pub fn new(cap: usize, min_healthy: usize) -> Self {
        Self {
            state: ArcSwap::from_pointee(PoolState::default()),
            cap,
            min_healthy,
        }
    }

    /// Merge one cycle's validated endpoints and the self-managed set into the pool.
    ///
    /// Last cycle's self-managed entries are not carried over; only the set passed
    /// here is appended. The cap holds as long as `self_managed.len() <= cap`,
    /// which configuration enforces. Returns the new pool size.
    pub fn merge(&self, validated: Vec<ProxyEndpoint>, self_managed: Vec<ProxyEndpoint>) -> usize {
        let current = self.state.load();
        let carried: Vec<ProxyEndpoint> = current
            .entries
            .iter()
            .filter(|e| !current.self_managed.contains(e))
            .cloned()
            .collect();
        let entries = merge_entries(&carried, validated, &self_managed, self.cap);
        let size = entries.len();

        self.state.store(Arc::new(PoolState {
            entries,
            self_managed,
            last_updated: now_epoch_secs(),
        }));

        info!("Proxy list updated with {} unique proxies", size);
        size
    }

    pub fn list_all(&self) -> Vec<ProxyEndpoint> {
        self.state.load().entries.clone()
    }

    pub fn self_managed(&self) -> Vec<ProxyEndpoint> {
        self.state.load().self_managed.clone()
    }

    /// Random sample over the whole pool, see [`sample`]
    pub fn random(&self, count: usize, prefix: Option<&str>) -> Vec<ProxyEndpoint> {
        sample(&self.state.load().entries, count, prefix)
    }

    /// Random sample over the self-managed set, see [`sample`]
    pub fn random_self_managed(&self, count: usize, prefix: Option<&str>) -> Vec<ProxyEndpoint> {
        sample(&self.state.load().self_managed, count, prefix)
    }

    pub fn count(&self) -> usize {
        self.state.load().entries.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Healthy only strictly above the minimum; an empty or thin pool reports unhealthy
    pub fn is_healthy(&self) -> bool {
        self.count() > self.min_healthy
    }

    /// Epoch seconds of the last merge, 0 if never refreshed
    pub fn last_updated(&self) -> f64 {
        self.state.load().last_updated
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.load();
        PoolStats::new(state.entries.len(), state.last_updated)
    }
}

/// Union validated and existing entries, freshest first, truncate to leave
/// room for the self-managed set, append it, dedup again. Overflow drops the
/// oldest entries.
pub fn merge_entries(
    existing: &[ProxyEndpoint],
    validated: Vec<ProxyEndpoint>,
    self_managed: &[ProxyEndpoint],
    cap: usize,
) -> Vec<ProxyEndpoint> {
    let managed: HashSet<&str> = self_managed.iter().map(|e| e.as_str()).collect();

    let mut seen = HashSet::new();
    let mut sourced: Vec<ProxyEndpoint> = validated
        .into_iter()
        .chain(existing.iter().cloned())
        .filter(|e| !managed.contains(e.as_str()))
        .filter(|e| seen.insert(e.as_str().to_string()))
        .collect();

    sourced.truncate(cap.saturating_sub(managed.len()));

    let mut seen = HashSet::new();
    sourced
        .into_iter()
        .chain(self_managed.iter().cloned())
        .filter(|e| seen.insert(e.as_str().to_string()))
        .collect()
}

/// Sample `count` entries without replacement, optionally restricted to a URI
/// prefix. `count` is clamped to `[1, available]`.
pub fn sample(entries: &[ProxyEndpoint], count: usize, prefix: Option<&str>) -> Vec<ProxyEndpoint> {
    let available: Vec<&ProxyEndpoint> = match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => entries.iter().filter(|e| e.as_str().starts_with(prefix)).collect(),
        None => entries.iter().collect(),
    };

    if available.is_empty() {
        return Vec::new();
    }

    let count = count.clamp(1, available.len());
    available
        .choose_multiple(&mut rand::thread_rng(), count)
        .map(|e| (*e).clone())
        .collect()
}

fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
