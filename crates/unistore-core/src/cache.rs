//! TTL cache for metadata reads, backed by Moka.
//!
//! Entries carry their own time-to-live. Expired entries are never returned
//! (Moka checks expiry on read) and are reclaimed by a periodic sweep.

use moka::sync::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache metadata reads at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default time-to-live in seconds (default: 300)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of entries (default: 10000)
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Sweep period in seconds (default: 30)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Evict a key's cached metadata after writes and deletes (default: false)
    #[serde(default)]
    pub invalidate_on_write: bool,
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            max_capacity: default_max_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
            invalidate_on_write: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

struct PerEntryTtl;

impl<V> Expiry<String, Entry<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// String-keyed cache whose entries expire after a per-entry TTL.
#[derive(Clone)]
pub struct TtlCache<V> {
    cache: Cache<String, Entry<V>>,
    default_ttl: Duration,
    enabled: bool,
    sweep_interval: Duration,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            cache,
            default_ttl: config.ttl(),
            enabled: config.enabled,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    /// Cached value for `key`, unless absent or expired
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        self.cache.get(key).map(|entry| entry.value)
    }

    /// Insert with an explicit TTL
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }
        self.cache.insert(key.into(), Entry { value, ttl });
    }

    /// Insert with the configured default TTL
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    /// Invalidates all cached entries.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Reclaim expired entries now
    pub fn sweep(&self) {
        self.cache.run_pending_tasks();
    }

    /// Run [`sweep`](Self::sweep) periodically until shutdown
    pub fn spawn_sweeper(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = self.clone();
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                    _ = shutdown.recv() => {
                        debug!("Cache sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}
