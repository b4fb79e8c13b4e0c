//! Bounded, TTL-aware LRU caches shared by the selector and the invoker.
//!
//! One `Mutex` guards the LRU list together with the insertion timestamps, so lookup,
//! expiry and insertion are atomic with respect to concurrent requests.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{normalize_request, RequestContext, SelectionResult};

/// Counters reported by a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to respect the capacity bound.
    pub evictions: u64,
    /// Entries dropped because they outlived the TTL.
    pub expirations: u64,
    pub len: usize,
    pub capacity: usize,
}

struct Entry<V> {
    value: V,
    created_at: Instant,
}

struct CacheInner<V> {
    entries: LruCache<String, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// LRU cache of bounded capacity whose entries expire `ttl` after insertion.
pub struct TtlLruCache<V> {
    inner: Mutex<CacheInner<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlLruCache<V> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, promoted to most-recently-used. Stale entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        Self::get_locked(&mut inner, key, self.ttl)
    }

    fn get_locked(inner: &mut CacheInner<V>, key: &str, ttl: Duration) -> Option<V> {
        let stale = match inner.entries.get(key) {
            Some(entry) if entry.created_at.elapsed() > ttl => true,
            Some(entry) => {
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
            None => false,
        };
        if stale {
            inner.entries.pop(key);
            inner.expirations += 1;
        }
        inner.misses += 1;
        None
    }

    /// Insert or overwrite `key`, evicting the least-recently-used entry when full.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut inner = self.lock();
        Self::put_locked(&mut inner, key.into(), value);
    }

    fn put_locked(inner: &mut CacheInner<V>, key: String, value: V) {
        let entry = Entry {
            value,
            created_at: Instant::now(),
        };
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry) {
            if evicted != key {
                tracing::debug!(key = %evicted, "Cache entry evicted");
                inner.evictions += 1;
            }
        }
    }

    /// Store `value` unless a fresh entry already exists; returns whichever value is cached.
    /// The check and the insert happen under one lock.
    pub fn insert_if_absent(&self, key: impl Into<String>, value: V) -> V {
        let key = key.into();
        let mut inner = self.lock();
        if let Some(existing) = Self::get_locked(&mut inner, &key, self.ttl) {
            return existing;
        }
        Self::put_locked(&mut inner, key, value.clone());
        value
    }

    /// Whether a fresh entry exists. Does not touch recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .entries
            .peek(key)
            .is_some_and(|e| e.created_at.elapsed() <= self.ttl)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            len: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }
}

impl<V> std::fmt::Debug for TtlLruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlLruCache").field("ttl", &self.ttl).finish()
    }
}

// ─── Selection / execution caches ───────────────────────────────────────────

/// A cached selection: a single choice or a ranked list.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedSelection {
    One(SelectionResult),
    Many(Vec<SelectionResult>),
}

pub type SelectionCache = TtlLruCache<CachedSelection>;

/// Successful capability outputs keyed by (capability, args).
pub type ExecutionCache = TtlLruCache<String>;

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Key for `select`: normalized request plus the whitelisted context fields.
pub fn selection_key(request: &str, ctx: &RequestContext) -> String {
    digest(&["one", &normalize_request(request), &ctx.cache_key_fragment()])
}

/// Key for `select_many`; `top_k` is part of the key.
pub fn ranking_key(request: &str, ctx: &RequestContext, top_k: usize) -> String {
    let k = top_k.to_string();
    digest(&["many", &k, &normalize_request(request), &ctx.cache_key_fragment()])
}

/// Key for the execution cache.
pub fn execution_key(capability: &str, args: &Value) -> String {
    digest(&[capability, &args.to_string()])
}
