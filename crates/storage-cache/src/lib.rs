//! Cache gateway for generated payloads with time-based eviction.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use runtime_clock::SharedClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Deterministic key for a cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a question batch scoped by topic and difficulty band.
    #[must_use]
    pub fn batch(topic_id: u64, difficulty: &str) -> Self {
        Self(format!("items:{topic_id}:{}", difficulty.trim().to_lowercase()))
    }

    /// Key for a submitted artifact: content digest plus exercise.
    #[must_use]
    pub fn artifact(content: &str, exercise_id: u64) -> Self {
        Self(format!("artifact:{}:{exercise_id}", content_digest(content)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex MD5 digest of `content`, matching digests already persisted
/// in feedback records.
#[must_use]
pub fn content_digest(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup<T> {
    /// Whether a live entry satisfied the lookup.
    pub found: bool,
    /// Cached records; empty on a miss.
    pub payload: Vec<T>,
}

impl<T> CacheLookup<T> {
    #[must_use]
    pub const fn miss() -> Self {
        Self {
            found: false,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub const fn hit(payload: Vec<T>) -> Self {
        Self {
            found: true,
            payload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    /// Records stored under `key`, served as one unit.
    pub payload: Vec<T>,
    /// Clock reading taken when the entry was written.
    pub stored_at: Instant,
    /// Lifetime measured from `stored_at`.
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// Entries are served only while `now < stored_at + ttl`.
    #[must_use]
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.stored_at + self.ttl
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache state poisoned: {0}")]
    Poisoned(String),
}

/// Key-based store for previously produced structured results.
pub trait CacheGateway<T>: Send + Sync {
    /// Return the live payload stored under `key`, if any.
    fn lookup(&self, key: &CacheKey) -> Result<CacheLookup<T>, CacheError>;

    /// Batch lookup: a hit only when at least `quantity` records are cached.
    /// Shorter payloads count as a full miss.
    fn lookup_at_least(
        &self,
        key: &CacheKey,
        quantity: usize,
    ) -> Result<CacheLookup<T>, CacheError> {
        let lookup = self.lookup(key)?;
        if lookup.found && lookup.payload.len() >= quantity {
            Ok(lookup)
        } else {
            Ok(CacheLookup::miss())
        }
    }

    /// Insert or replace the payload under `key`; last writer wins.
    fn store(&self, key: CacheKey, payload: Vec<T>, ttl: Duration) -> Result<(), CacheError>;

    /// Drop every entry with `stored_at + ttl <= now`, returning how many went.
    fn sweep(&self, now: Instant) -> Result<usize, CacheError>;

    /// Number of entries currently held, live or not yet swept.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared pointer helper for orchestrators.
pub type SharedCache<T> = Arc<dyn CacheGateway<T>>;

/// In-process cache. Reads never evict; expiry is enforced at read time and
/// storage is reclaimed by [`CacheGateway::sweep`].
#[derive(Debug)]
pub struct MemoryCache<T> {
    clock: SharedClock,
    entries: Mutex<HashMap<CacheKey, CacheEntry<T>>>,
}

impl<T> MemoryCache<T> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> CacheGateway<T> for MemoryCache<T>
where
    T: Clone + Send + Sync,
{
    fn lookup(&self, key: &CacheKey) -> Result<CacheLookup<T>, CacheError> {
        let now = self.clock.now();
        let guard = self
            .entries
            .lock()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        match guard.get(key) {
            Some(entry) if entry.is_live(now) => Ok(CacheLookup::hit(entry.payload.clone())),
            _ => Ok(CacheLookup::miss()),
        }
    }

    fn store(&self, key: CacheKey, payload: Vec<T>, ttl: Duration) -> Result<(), CacheError> {
        let stored_at = self.clock.now();
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        debug!(key = %key, records = payload.len(), ttl_secs = ttl.as_secs(), "cache store");
        guard.insert(
            key.clone(),
            CacheEntry {
                key,
                payload,
                stored_at,
                ttl,
            },
        );
        Ok(())
    }

    fn sweep(&self, now: Instant) -> Result<usize, CacheError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| CacheError::Poisoned(e.to_string()))?;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        Ok(before - guard.len())
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

/// Run `sweep` on `cache` every `period` until the returned task is aborted.
pub fn spawn_sweeper<T>(
    cache: SharedCache<T>,
    clock: SharedClock,
    period: Duration,
    label: &'static str,
) -> JoinHandle<()>
where
    T: 'static,
{
    tokio::spawn(async move {
        loop {
            clock.sleep(period).await;
            match cache.sweep(clock.now()) {
                Ok(removed) => debug!(cache = label, removed, remaining = cache.len(), "cache sweep"),
                Err(err) => warn!(cache = label, error = %err, "cache sweep failed"),
            }
        }
    })
}
