//! Named caches with TTL eviction
//!
//! A [`CacheDirectory`] owns any number of named caches. Each cache is a
//! TTL-keyed store of JSON values with a lock per key, and doubles as a
//! named mutex through [`CacheDirectory::synchronize`]. A single background
//! sweeper task evicts expired keys.

mod gc;
mod named;

pub use gc::spawn_sweeper;
pub use named::{CacheConfig, CacheDirectory, DEFAULT_CACHE_TTL};

/// Cache of per-device inventory facts, keyed by device serial
pub const DEVICE_FACTS_CACHE: &str = "device-facts";
