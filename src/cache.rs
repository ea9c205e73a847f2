//! Bounded LRU + TTL response cache.
//!
//! Entries are keyed by a [`Fingerprint`] of the normalized input text and
//! category. Expiry is lazy: an entry past its TTL is dropped by the lookup
//! that finds it (or by [`CacheStore::purge_expired`]). On overflow the entry
//! with the oldest *access* (not insertion) is evicted.
//!
//! Per-key locks let a caller serialize work on one fingerprint, so a
//! duplicate input waits for the first writer and then hits the cache.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;

/// Separator between the text and category parts of a fingerprint.
const UNIT_SEPARATOR: char = '\u{1f}';

/// Cache key for an (input text, category) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint normalized text and category.
    ///
    /// Text is trimmed, whitespace-collapsed and lowercased; the category is
    /// trimmed and lowercased.
    pub fn new(text: &str, category: &str) -> Self {
        let text = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let category = category.trim().to_lowercase();

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(UNIT_SEPARATOR.to_string().as_bytes());
        hasher.update(category.as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get(..16).unwrap_or(&self.0)) // Short form for display
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses (absent or expired)
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Entries currently held
    pub current_size: usize,
    /// Maximum number of entries
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of capacity in use.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.current_size as f64 / self.capacity as f64
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
    last_accessed: Instant,
    /// Position in the recency index
    tick: u64,
    hit_count: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<Fingerprint, CacheEntry<V>>,
    /// Access tick -> key; the first entry is the least recently used
    recency: BTreeMap<u64, Fingerprint>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &Fingerprint, now: Instant) -> Option<&CacheEntry<V>> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        self.recency.insert(tick, key.clone());
        entry.tick = tick;
        entry.last_accessed = now;
        entry.hit_count += 1;
        Some(entry)
    }

    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<(Fingerprint, CacheEntry<V>)> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        Some((key, entry))
    }
}

type KeyLockMap = HashMap<Fingerprint, Arc<Mutex<()>>>;

fn lock_map(locks: &std::sync::Mutex<KeyLockMap>) -> MutexGuard<'_, KeyLockMap> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded, TTL-aware, LRU cache shared by all batch workers.
#[derive(Debug)]
pub struct CacheStore<V> {
    inner: Mutex<Inner<V>>,
    key_locks: Arc<std::sync::Mutex<KeyLockMap>>,
    capacity: usize,
    ttl: Duration,
}

/// Registration of one holder or waiter on a fingerprint's lock. The last
/// registration to drop removes the map entry.
#[derive(Debug)]
struct KeyLockRef {
    locks: Arc<std::sync::Mutex<KeyLockMap>>,
    key: Fingerprint,
    lock: Arc<Mutex<()>>,
}

impl KeyLockRef {
    fn register(locks: &Arc<std::sync::Mutex<KeyLockMap>>, key: &Fingerprint) -> Self {
        let lock = lock_map(locks).entry(key.clone()).or_default().clone();
        Self {
            locks: Arc::clone(locks),
            key: key.clone(),
            lock,
        }
    }
}

impl Drop for KeyLockRef {
    fn drop(&mut self) {
        let mut locks = lock_map(&self.locks);
        // Map entry plus this reference means nobody else holds or awaits it
        let idle = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(&self.key);
        }
    }
}

/// Exclusive hold on one fingerprint, released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    // Released before the registration checks for idleness
    _guard: OwnedMutexGuard<()>,
    _registration: KeyLockRef,
}

impl<V: Clone> CacheStore<V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            key_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Create a cache from validated configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry, refreshing its recency.
    pub async fn get(&self, key: &Fingerprint) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let Some(expired) = inner.entries.get(key).map(|entry| now >= entry.expires_at) else {
            inner.misses += 1;
            return None;
        };

        if expired {
            if let Some(entry) = inner.remove(key) {
                debug!(
                    key = %key,
                    age_ms = now.duration_since(entry.inserted_at).as_millis() as u64,
                    "Cache entry expired"
                );
            }
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.touch(key, now).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite an entry, evicting the least recently used entry
    /// when over capacity.
    pub async fn put(&self, key: Fingerprint, value: V) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        inner.remove(&key);
        let tick = inner.next_tick();
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + self.ttl,
                last_accessed: now,
                tick,
                hit_count: 0,
            },
        );

        while inner.entries.len() > self.capacity {
            let Some((evicted, entry)) = inner.evict_lru() else {
                break;
            };
            inner.evictions += 1;
            debug!(
                key = %evicted,
                hits = entry.hit_count,
                idle_ms = now.duration_since(entry.last_accessed).as_millis() as u64,
                "Evicted least recently used cache entry"
            );
        }
    }

    /// Remove an entry. Returns whether it was present.
    pub async fn remove(&self, key: &Fingerprint) -> bool {
        let mut inner = self.inner.lock().await;
        inner.remove(key).is_some()
    }

    /// Drop all entries. Counters are kept.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Drop every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let expired: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        inner.expirations += expired.len() as u64;
        expired.len()
    }

    /// Number of entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            current_size: inner.entries.len(),
            capacity: self.capacity,
        }
    }

    /// Take the single-writer lock for a fingerprint.
    ///
    /// A lock is dropped from the table once nobody holds or awaits it,
    /// including waiters whose future is cancelled.
    pub async fn lock_key(&self, key: &Fingerprint) -> KeyGuard {
        let registration = KeyLockRef::register(&self.key_locks, key);
        let guard = Arc::clone(&registration.lock).lock_owned().await;

        KeyGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Number of fingerprints with a live holder or waiter.
    #[cfg(test)]
    pub(crate) fn key_lock_count(&self) -> usize {
        lock_map(&self.key_locks).len()
    }
}
