//! Shared fast tier.
//!
//! An externally synchronized network key-value service (Redis) giving all
//! workers the same view of hot pages. Entry expiry rides on the service's
//! own per-key TTL support.

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use super::StoreError;

const SCAN_BATCH: usize = 100;

/// Networked key-value tier operations.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Remove every key matching a glob pattern, returning how many went.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError>;
}

/// Redis-backed shared tier.
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::Shared)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(StoreError::Shared)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(StoreError::Shared)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl_seconds)
            .await
            .map_err(StoreError::Shared)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(StoreError::Shared)?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.manager.clone();
        let mut removed = 0u64;
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(StoreError::Shared)?;
            if !keys.is_empty() {
                let deleted: u64 = conn.del(keys).await.map_err(StoreError::Shared)?;
                removed += deleted;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-in for unit tests; production deployments always
    //! point at a real network service.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        entries: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemoryStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn contains(&self, key: &str) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }

        pub(crate) fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        pub(crate) fn remove(&self, key: &str) {
            self.entries.lock().unwrap().remove(key);
        }
    }

    #[async_trait]
    impl SharedStore for MemoryStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &[u8], _ttl_seconds: u64) -> Result<(), StoreError> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn delete_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
            let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            Ok((before - entries.len()) as u64)
        }
    }
}
