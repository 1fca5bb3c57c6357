//! Time-bounded response cache keyed by request fingerprints.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Derives the cache key for the exact string that is sent upstream.
///
/// When `target` is given the key is namespaced by it, so the same prompt
/// sent to two different agents never shares an entry.
pub fn fingerprint(augmented_query: &str, target: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    if let Some(target) = target {
        hasher.update(target.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(augmented_query.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub stored_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

#[derive(Debug)]
pub struct FingerprintCache {
    ttl: Duration,
    max_entries: Option<usize>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl FingerprintCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn lookup(&self, key: &str, now: Instant) -> Option<CacheEntry> {
        let guard = self.entries.lock();
        guard
            .get(key)
            .filter(|entry| entry.is_live(now, self.ttl))
            .cloned()
    }

    pub fn store(&self, key: impl Into<String>, value: impl Into<String>, now: Instant) {
        let key = key.into();
        let mut guard = self.entries.lock();
        if let Some(limit) = self.max_entries {
            if !guard.contains_key(&key) && guard.len() >= limit {
                let oldest = guard
                    .values()
                    .min_by_key(|entry| entry.stored_at)
                    .map(|entry| entry.key.clone());
                if let Some(oldest) = oldest {
                    guard.remove(&oldest);
                }
            }
        }
        guard.insert(
            key.clone(),
            CacheEntry {
                key,
                value: value.into(),
                stored_at: now,
            },
        );
    }

    /// Drops every entry whose age has reached the TTL. Returns how many went.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut guard = self.entries.lock();
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now, self.ttl));
        let purged = before - guard.len();
        if purged > 0 {
            debug!(purged, remaining = guard.len(), "purged expired cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
