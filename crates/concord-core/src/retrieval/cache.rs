//! Fused-result cache with TTL and epoch invalidation.
//!
//! Entries are keyed per (namespace, normalized query, vector weight). A
//! short TTL bounds staleness in the absence of writes; the per-namespace
//! epoch counter, bumped on every resolver merge/link, invalidates entries
//! early regardless of TTL.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::Namespace;

use super::fusion::SearchItem;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub namespace: Namespace,
    pub normalized_query: String,
    /// Bit pattern of the vector weight; the graph weight is its complement
    /// in the request and does not key separately.
    pub weight_bits: u32,
}

struct CacheEntry {
    created: Instant,
    epoch: u64,
    items: Vec<SearchItem>,
    partial: bool,
}

pub(crate) struct QueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    capacity: usize,
}

impl QueryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Fetch a live entry: within TTL and at the current namespace epoch.
    /// Stale entries are removed on the way out.
    pub fn get(&self, key: &CacheKey, current_epoch: u64) -> Option<(Vec<SearchItem>, bool)> {
        let live = {
            let entry = self.entries.get(key)?;
            entry.created.elapsed() <= self.ttl && entry.epoch == current_epoch
        };
        if !live {
            self.entries.remove(key);
            return None;
        }
        self.entries
            .get(key)
            .map(|e| (e.items.clone(), e.partial))
    }

    pub fn insert(&self, key: CacheKey, epoch: u64, items: Vec<SearchItem>, partial: bool) {
        if self.entries.len() >= self.capacity {
            self.evict_expired();
        }
        self.entries.insert(
            key,
            CacheEntry {
                created: Instant::now(),
                epoch,
                items,
                partial,
            },
        );
    }

    fn evict_expired(&self) {
        self.entries.retain(|_, entry| entry.created.elapsed() <= self.ttl);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
