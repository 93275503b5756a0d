//! Decision store: key/value cache with per-key expiry.
//!
//! Two interchangeable backends implement [`DecisionStore`]:
//! - [`LocalStore`]: in-process sharded map with its own expiry bookkeeping
//! - [`RedisStore`]: networked store relying on native key expiry
//!
//! Lookups distinguish an authoritative miss ([`CacheError::Miss`]) from a
//! backend that could not be consulted ([`CacheError::Unreachable`]).

mod local;
mod redis_store;

pub use self::local::LocalStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Backend contract shared by all decision store implementations.
///
/// Implementations must be safe for concurrent use and must never panic or
/// propagate backend faults out of `set`/`delete`.
pub trait DecisionStore: Send + Sync {
    /// Get the live value stored under `key`.
    fn get(&self, key: &str) -> Result<String, CacheError>;

    /// Store `value` under `key` for `ttl`, replacing any previous value.
    fn set(&self, key: &str, value: &str, ttl: Duration);

    /// Remove `key`. Removing an absent key is a no-op.
    fn delete(&self, key: &str);

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Handle to the process-wide decision store.
///
/// Wraps a backend and traces every operation.
#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn DecisionStore>,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn DecisionStore>) -> Self {
        log::debug!("cache:new backend:{}", backend.name());
        Self { backend }
    }

    /// Create a client over a fresh in-process store.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalStore::new()))
    }

    pub fn get(&self, key: &str) -> Result<String, CacheError> {
        let start = Instant::now();
        let result = self.backend.get(key);
        log::trace!(
            "cache:get key:{} result:{:?} took:{:?}",
            key,
            result,
            start.elapsed()
        );
        result
    }

    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        let start = Instant::now();
        self.backend.set(key, value, ttl);
        log::trace!(
            "cache:set key:{} value:{} ttl:{:?} took:{:?}",
            key,
            value,
            ttl,
            start.elapsed()
        );
    }

    pub fn delete(&self, key: &str) {
        let start = Instant::now();
        self.backend.delete(key);
        log::trace!("cache:delete key:{} took:{:?}", key, start.elapsed());
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Backend that records calls and always reports itself unreachable.
    #[derive(Default)]
    struct DownStore {
        writes: Mutex<Vec<String>>,
    }

    impl DecisionStore for DownStore {
        fn get(&self, _key: &str) -> Result<String, CacheError> {
            Err(CacheError::Unreachable)
        }

        fn set(&self, key: &str, _value: &str, _ttl: Duration) {
            self.writes.lock().push(key.to_string());
        }

        fn delete(&self, _key: &str) {}

        fn name(&self) -> &str {
            "down"
        }
    }

    #[test]
    fn test_client_delegates() {
        let backend = Arc::new(DownStore::default());
        let client = CacheClient::new(backend.clone());

        assert_eq!(client.get("1.2.3.4"), Err(CacheError::Unreachable));
        client.set("1.2.3.4", "t", Duration::from_secs(1));
        client.delete("1.2.3.4");

        assert_eq!(client.backend_name(), "down");
        assert_eq!(backend.writes.lock().as_slice(), ["1.2.3.4"]);
    }

    #[test]
    fn test_local_client_roundtrip() {
        let client = CacheClient::local();
        assert_eq!(client.get("k"), Err(CacheError::Miss));
        client.set("k", "v", Duration::from_secs(60));
        assert_eq!(client.get("k").as_deref(), Ok("v"));
        client.delete("k");
        assert_eq!(client.get("k"), Err(CacheError::Miss));
    }
}
