//! Tenant lookup caching.
//!
//! A hit returns a snapshot that may be stale by up to the configured
//! staleness window. An environment stopped in the tenant database keeps
//! resolving from cache until its entry ages out or is invalidated through
//! [`TenantCache::invalidate`] / [`TenantCache::clear`]. Misses are never
//! cached, so a newly created record is visible on the next lookup.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::observability::metrics;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
}

/// A thread-safe cache mapping a lookup key (slug, host, id) to a record.
#[derive(Debug, Clone)]
pub struct TenantCache<T> {
    name: &'static str,
    inner: Arc<DashMap<String, CacheEntry<T>>>,
    capacity: usize,
    ttl: Duration,
}

impl<T: Clone> TenantCache<T> {
    /// Create a cache. A zero `ttl` or `capacity` disables caching: every
    /// lookup falls through to the store.
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            inner: Arc::new(DashMap::new()),
            capacity,
            ttl,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn enabled(&self) -> bool {
        self.capacity > 0 && !self.ttl.is_zero()
    }

    /// Get a cached snapshot if present and within the staleness window.
    pub fn get(&self, key: &str) -> Option<T> {
        if !self.enabled() {
            return None;
        }

        let hit = self
            .inner
            .get(key)
            .and_then(|entry| (entry.inserted_at.elapsed() < self.ttl).then(|| entry.value.clone()));

        // The read guard is released above; safe to take the shard write lock.
        if hit.is_none() {
            self.inner.remove_if(key, |_, e| e.inserted_at.elapsed() >= self.ttl);
        }
        metrics::record_cache_lookup(self.name, hit.is_some());
        hit
    }

    /// Store a snapshot. Concurrent inserts for the same key are equivalent
    /// snapshots; last writer wins.
    pub fn insert(&self, key: impl Into<String>, value: T) {
        if !self.enabled() {
            return;
        }

        if self.inner.len() >= self.capacity {
            self.evict();
        }

        self.inner.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop one key, e.g. after the record changed upstream.
    pub fn invalidate(&self, key: &str) {
        self.inner.remove(key);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Make room for one entry: expired entries first, then the oldest.
    fn evict(&self) {
        let ttl = self.ttl;
        self.inner.retain(|_, e| e.inserted_at.elapsed() < ttl);
        if self.inner.len() < self.capacity {
            return;
        }

        let oldest = self
            .inner
            .iter()
            .min_by_key(|r| r.value().inserted_at)
            .map(|r| r.key().clone());
        if let Some(key) = oldest {
            self.inner.remove(&key);
        }
    }
}
