//! Cache directory and named cache implementation
//!
//! Locking is tiered and always acquired outermost-first: the directory
//! lock guards the set of cache names, each cache's own lock guards its key
//! directory (setup, sweeps, `synchronize`), and each key has a slot lock
//! guarding only that value. Unrelated keys in the same cache never contend.

use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Default max age for cache entries
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default interval between sweeper runs
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the cache directory
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Max age applied when `setup` is called without an explicit TTL
    pub default_ttl: Duration,
    /// Interval between background sweeps
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_CACHE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

// =============================================================================
// Key Slots
// =============================================================================

/// Value cell behind a slot lock. `value` is `None` for a slot that was
/// created by `read_or_set` but not yet populated.
struct SlotInner {
    value: Option<Value>,
    created_at: Instant,
}

/// One key's storage: its own lock and the guarded cell
struct CacheSlot {
    cell: Mutex<SlotInner>,
}

impl CacheSlot {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            cell: Mutex::new(SlotInner {
                value: None,
                created_at: Instant::now(),
            }),
        })
    }
}

// =============================================================================
// Named Cache
// =============================================================================

/// A single named cache: key directory plus the cache-level lock
struct NamedCache {
    name: String,
    max_age: Duration,
    /// Cache-level lock: `synchronize`, sweeps
    lock: Mutex<()>,
    slots: DashMap<String, Arc<CacheSlot>>,
}

impl NamedCache {
    fn new(name: &str, max_age: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            max_age,
            lock: Mutex::new(()),
            slots: DashMap::new(),
        })
    }

    fn slot(&self, key: &str) -> Option<Arc<CacheSlot>> {
        self.slots.get(key).map(|s| s.clone())
    }

    fn slot_or_create(&self, key: &str) -> Arc<CacheSlot> {
        self.slots
            .entry(key.to_string())
            .or_insert_with(CacheSlot::empty)
            .clone()
    }

    /// Remaining lifetime of an entry created at `created_at`, in whole
    /// seconds. Negative once expired.
    fn remaining_secs(&self, created_at: Instant) -> i64 {
        let age = created_at.elapsed().as_secs() as i64;
        let max = i64::try_from(self.max_age.as_secs()).unwrap_or(0);
        max - age
    }

    /// Delete every expired key, returning how many were removed.
    /// Runs under the cache-level lock.
    async fn sweep(&self) -> usize {
        let _guard = self.lock.lock().await;

        let keys: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;

        for key in keys {
            let slot = match self.slot(&key) {
                Some(s) => s,
                None => continue,
            };
            let cell = slot.cell.lock().await;
            let expired = cell.value.is_none() || self.remaining_secs(cell.created_at) <= 0;
            drop(cell);

            if expired && self.slots.remove(&key).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(cache = %self.name, removed, "Swept expired cache keys");
        }
        removed
    }
}

// =============================================================================
// Cache Directory
// =============================================================================

/// Owns the set of named caches. Construct one per orchestrator and pass it
/// through the pipeline; there is no process-wide instance.
pub struct CacheDirectory {
    caches: RwLock<HashMap<String, Arc<NamedCache>>>,
    config: CacheConfig,
}

impl CacheDirectory {
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            caches: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Interval the background sweeper should run at
    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }

    /// Create a named cache. Idempotent: a second call with the same name is
    /// a no-op and leaves the original TTL in place.
    pub fn setup(&self, name: &str, ttl: Option<Duration>) {
        let mut caches = self.caches.write();
        caches.entry(name.to_string()).or_insert_with(|| {
            debug!(cache = name, "Created named cache");
            NamedCache::new(name, ttl.unwrap_or(self.config.default_ttl))
        });
    }

    fn cache(&self, name: &str) -> Result<Arc<NamedCache>> {
        self.caches
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CacheUnknown {
                cache: name.to_string(),
            })
    }

    /// Store a value, creating the key slot if absent and resetting its
    /// creation timestamp. Returns the stored value.
    pub async fn write(&self, cache: &str, key: &str, value: Value) -> Result<Value> {
        let cache = self.cache(cache)?;
        let slot = cache.slot_or_create(key);

        let mut cell = slot.cell.lock().await;
        cell.value = Some(value.clone());
        cell.created_at = Instant::now();

        Ok(value)
    }

    /// Read a value. Returns a deep copy; mutating the returned value never
    /// affects the cached one.
    pub async fn read(&self, cache: &str, key: &str) -> Result<Value> {
        let cache_name = cache.to_string();
        let cache = self.cache(cache)?;

        let slot = cache.slot(key).ok_or_else(|| Error::CacheKeyMissing {
            cache: cache_name.clone(),
            key: key.to_string(),
        })?;

        let cell = slot.cell.lock().await;
        let value = cell.value.as_ref().ok_or_else(|| Error::CacheKeyMissing {
            cache: cache_name.clone(),
            key: key.to_string(),
        })?;

        if cache.remaining_secs(cell.created_at) <= 0 {
            return Err(Error::CacheKeyExpired {
                cache: cache_name,
                key: key.to_string(),
            });
        }

        Ok(value.clone())
    }

    /// Read the value, or compute and store it when absent or expired. The
    /// initializer runs under the key's slot lock and only on a miss.
    /// Always returns a deep copy.
    pub async fn read_or_set<F>(&self, cache: &str, key: &str, init: F) -> Result<Value>
    where
        F: FnOnce() -> Value,
    {
        let cache = self.cache(cache)?;
        let slot = cache.slot_or_create(key);

        let mut cell = slot.cell.lock().await;
        let live = cell
            .value
            .as_ref()
            .filter(|_| cache.remaining_secs(cell.created_at) > 0)
            .cloned();

        match live {
            Some(value) => Ok(value),
            None => {
                let value = init();
                cell.value = Some(value.clone());
                cell.created_at = Instant::now();
                Ok(value)
            }
        }
    }

    /// Remaining lifetime of a key in whole seconds; negative once expired.
    /// Clamped to 0 when the slot exists but holds no value.
    pub async fn ttl(&self, cache: &str, key: &str) -> Result<i64> {
        let cache_name = cache.to_string();
        let cache = self.cache(cache)?;

        let slot = cache.slot(key).ok_or_else(|| Error::CacheKeyMissing {
            cache: cache_name,
            key: key.to_string(),
        })?;

        let cell = slot.cell.lock().await;
        if cell.value.is_none() {
            return Ok(0);
        }
        Ok(cache.remaining_secs(cell.created_at))
    }

    /// Remove a key. Returns whether it existed. Removal is atomic on the
    /// key directory and does not take the slot lock.
    pub fn evict(&self, cache: &str, key: &str) -> Result<bool> {
        let cache = self.cache(cache)?;
        Ok(cache.slots.remove(key).is_some())
    }

    /// Run the future while holding the cache's own lock. This is the
    /// named-mutex facility: `setup` a cache with no keys and `synchronize`
    /// on it to serialize arbitrary work.
    pub async fn synchronize<F, Fut, R>(&self, cache: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let cache = self.cache(cache)?;
        let _guard = cache.lock.lock().await;
        Ok(f().await)
    }

    /// Sweep every cache, deleting expired keys. Called by the background
    /// sweeper; per-cache failures never stop the loop.
    pub async fn sweep_expired(&self) -> usize {
        let caches: Vec<Arc<NamedCache>> = self.caches.read().values().cloned().collect();

        let mut removed = 0;
        for cache in caches {
            removed += cache.sweep().await;
        }
        removed
    }

    /// Names of all known caches, for diagnostics
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }
}
