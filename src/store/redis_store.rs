//! Networked decision store backed by redis.

use parking_lot::Mutex;
use redis::{Client, Connection, IntoConnectionInfo, RedisResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::DecisionStore;
use crate::error::{CacheError, Result};

/// Connection parameters for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// `host:port`
    pub host: String,
    pub password: Option<String>,
    /// Database index; separate indexes keep bouncer instances apart.
    pub database: i64,
    /// Connect/read/write timeout.
    pub timeout: Duration,
    /// Number of pooled connections.
    pub pool_size: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:6379".to_string(),
            password: None,
            database: 0,
            timeout: Duration::from_secs(2),
            pool_size: 8,
        }
    }
}

/// Decision store using redis native key expiry.
///
/// Holds a small fixed pool of lazily (re)connected connections picked
/// round-robin. Any command failure drops the connection it ran on and is
/// reported as [`CacheError::Unreachable`]; the next use reconnects.
pub struct RedisStore {
    client: Client,
    slots: Vec<Mutex<Option<Connection>>>,
    next: AtomicUsize,
    timeout: Duration,
}

impl RedisStore {
    /// Create the store and probe the server once.
    ///
    /// An unreachable server is logged, not returned: requests will apply
    /// the configured fallback until it comes back.
    pub fn new(config: &RedisStoreConfig) -> Result<Self> {
        let mut info = format!("redis://{}/", config.host).into_connection_info()?;
        info.redis.db = config.database;
        info.redis.password = config.password.clone().filter(|p| !p.is_empty());

        let store = Self {
            client: Client::open(info)?,
            slots: (0..config.pool_size.max(1)).map(|_| Mutex::new(None)).collect(),
            next: AtomicUsize::new(0),
            timeout: config.timeout,
        };

        match store.with_connection(|conn| redis::cmd("PING").query::<String>(conn)) {
            Ok(_) => log::debug!("cache:redis connection successful host:{}", config.host),
            Err(e) => log::error!("cache:redis connection failed host:{} {}", config.host, e),
        }

        Ok(store)
    }

    fn connect(&self) -> RedisResult<Connection> {
        let conn = self.client.get_connection_with_timeout(self.timeout)?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> RedisResult<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[idx].lock();

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let result = op(&mut conn);
        if result.is_ok() {
            *slot = Some(conn);
        }
        result
    }
}

impl DecisionStore for RedisStore {
    fn get(&self, key: &str) -> std::result::Result<String, CacheError> {
        match self.with_connection(|conn| redis::cmd("GET").arg(key).query::<Option<String>>(conn)) {
            Ok(Some(value)) if !value.is_empty() => Ok(value),
            Ok(_) => Err(CacheError::Miss),
            Err(e) => {
                log::error!("cache:redis get key:{} {}", key, e);
                Err(CacheError::Unreachable)
            }
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) {
        // PX rejects 0
        let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        let result = self.with_connection(|conn| {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query::<()>(conn)
        });
        if let Err(e) = result {
            log::error!("cache:redis set key:{} {}", key, e);
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.with_connection(|conn| redis::cmd("DEL").arg(key).query::<()>(conn)) {
            log::error!("cache:redis delete key:{} {}", key, e);
        }
    }

    fn name(&self) -> &str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RedisStoreConfig {
        RedisStoreConfig {
            // Nothing listens on port 1
            host: "127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(200),
            pool_size: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_unreachable_server_does_not_fail_construction() {
        assert!(RedisStore::new(&unreachable_config()).is_ok());
    }

    #[test]
    fn test_unreachable_get_is_not_a_miss() {
        let store = RedisStore::new(&unreachable_config()).unwrap();
        assert_eq!(store.get("203.0.113.5"), Err(CacheError::Unreachable));
    }

    #[test]
    fn test_unreachable_set_and_delete_do_not_panic() {
        let store = RedisStore::new(&unreachable_config()).unwrap();
        store.set("203.0.113.5", "t", Duration::ZERO);
        store.delete("203.0.113.5");
        assert_eq!(store.name(), "redis");
    }
}
