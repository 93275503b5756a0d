//! In-process decision store.

use ahash::{AHashMap, RandomState};
use parking_lot::Mutex;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::DecisionStore;
use crate::clock::{deadline, Clock, SystemClock};
use crate::error::CacheError;

/// Number of independently locked shards.
const SHARD_COUNT: usize = 16;

/// A shard drops its expired entries every this many writes.
const SWEEP_EVERY: u32 = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Shard {
    map: AHashMap<String, Entry>,
    writes: u32,
}

/// Sharded in-process map with TTL.
///
/// Each key hashes to one shard, so concurrent requests for different
/// addresses rarely contend on the same lock. Expired entries are dropped
/// lazily on read, periodically on write, and in bulk by
/// [`LocalStore::purge_expired`].
pub struct LocalStore {
    shards: Vec<Mutex<Shard>>,
    hasher: RandomState,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(Shard::default()))
                .collect(),
            hasher: RandomState::new(),
            clock,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<Shard> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock();
                let before = shard.map.len();
                shard.map.retain(|_, e| now < e.expires_at);
                before - shard.map.len()
            })
            .sum()
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionStore for LocalStore {
    fn get(&self, key: &str) -> Result<String, CacheError> {
        let now = self.clock.now();
        let mut shard = self.shard(key).lock();
        match shard.map.get(key) {
            Some(entry) if now < entry.expires_at && !entry.value.is_empty() => {
                Ok(entry.value.clone())
            }
            Some(_) => {
                shard.map.remove(key);
                Err(CacheError::Miss)
            }
            None => Err(CacheError::Miss),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) {
        let now = self.clock.now();
        let mut shard = self.shard(key).lock();
        shard.writes = shard.writes.wrapping_add(1);
        if shard.writes % SWEEP_EVERY == 0 {
            shard.map.retain(|_, e| now < e.expires_at);
        }
        shard.map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: deadline(now, ttl),
            },
        );
    }

    fn delete(&self, key: &str) {
        self.shard(key).lock().map.remove(key);
    }

    fn name(&self) -> &str {
        "local"
    }
}
