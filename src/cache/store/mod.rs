//! Tiered page storage.
//!
//! Reads probe the shared network tier first, then the durable filesystem
//! tier; a disk hit repopulates the shared tier (write-back) so subsequent
//! reads stay fast. Writes flow durable-first. Both tiers honor the entry
//! TTL independently.

pub mod disk;
pub mod shared;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

pub use disk::DiskStore;
pub use shared::{RedisStore, SharedStore};

use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::keys::CacheKey;

const METRIC_HIT: &str = "macp_page_cache_hit_total";
const METRIC_MISS: &str = "macp_page_cache_miss_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shared store error: {0}")]
    Shared(#[from] redis::RedisError),
    #[error("gzip encoding failed: {0}")]
    Compression(#[source] std::io::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Two-tier store: optional shared network tier plus the durable disk tier.
///
/// The shared tier is absent in single-node deployments that run without a
/// key-value service; every operation degrades gracefully to disk-only.
pub struct TieredStore {
    disk: DiskStore,
    shared: Option<Arc<dyn SharedStore>>,
    namespace: String,
    ttl_seconds: u64,
    gzip_enabled: bool,
    content_type: String,
}

impl TieredStore {
    pub fn new(
        disk: DiskStore,
        shared: Option<Arc<dyn SharedStore>>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            disk,
            shared,
            namespace: config.namespace.clone(),
            ttl_seconds: config.ttl_seconds,
            gzip_enabled: config.gzip,
            content_type: config.content_type.clone(),
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    fn shared_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.namespace, key.as_str())
    }

    /// Look a key up across both tiers. Read failures on either tier are
    /// logged and treated as misses so the uncached path stays available.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(shared) = &self.shared {
            match shared.get(&self.shared_key(key)).await {
                Ok(Some(body)) => {
                    counter!(METRIC_HIT, "tier" => "shared").increment(1);
                    return Some(self.entry(key, Bytes::from(body), OffsetDateTime::now_utc()));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "shared tier read failed, falling through");
                }
            }
        }
        match self.disk.read(key, self.ttl_seconds).await {
            Ok(Some(hit)) => {
                counter!(METRIC_HIT, "tier" => "disk").increment(1);
                if let Some(shared) = &self.shared
                    && let Err(err) = shared
                        .set(&self.shared_key(key), &hit.body, self.ttl_seconds)
                        .await
                {
                    warn!(key = %key, error = %err, "write-back to shared tier failed");
                }
                Some(self.entry(key, hit.body, hit.created_at))
            }
            Ok(None) => {
                counter!(METRIC_MISS).increment(1);
                None
            }
            Err(err) => {
                warn!(key = %key, error = %err, "disk tier read failed, treating as miss");
                counter!(METRIC_MISS).increment(1);
                None
            }
        }
    }

    /// Commit a page: durable plain variant, then the gzip variant, then
    /// the shared write-through. Each step runs only if the previous one
    /// succeeded; an identical repeated put is observably a no-op.
    pub async fn put(&self, key: &CacheKey, body: &[u8]) -> Result<(), StoreError> {
        self.disk.write(key, body).await?;
        if self.gzip_enabled {
            self.disk.write_gzip(key, body).await?;
        }
        if let Some(shared) = &self.shared {
            shared
                .set(&self.shared_key(key), body, self.ttl_seconds)
                .await?;
        }
        Ok(())
    }

    /// Drop one key from both tiers; the key is unreadable on this node
    /// once this returns.
    pub async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.disk.remove(key).await?;
        if let Some(shared) = &self.shared {
            shared.delete(&self.shared_key(key)).await?;
        }
        Ok(())
    }

    /// Drop every key starting with `prefix` from both tiers.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut removed = self.disk.remove_prefix(prefix).await?;
        if let Some(shared) = &self.shared {
            removed += shared
                .delete_pattern(&format!("{}{prefix}*", self.namespace))
                .await?;
        }
        Ok(removed)
    }

    /// Drop everything in both tiers. The disk side is one bounded
    /// directory pass, not a per-key loop.
    pub async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut removed = self.disk.clear().await?;
        if let Some(shared) = &self.shared {
            removed += shared.delete_pattern(&format!("{}*", self.namespace)).await?;
        }
        Ok(removed)
    }

    fn entry(&self, key: &CacheKey, body: Bytes, created_at: OffsetDateTime) -> CacheEntry {
        CacheEntry {
            key: key.clone(),
            body,
            created_at,
            ttl_seconds: self.ttl_seconds,
            content_type: self.content_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::keys::derive_url;
    use crate::cache::store::shared::testing::MemoryStore;

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: TieredStore,
        shared: Arc<MemoryStore>,
    }

    async fn fixture(config: CacheConfig) -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let disk = DiskStore::open(dir.path().join("macp"))
            .await
            .expect("open disk store");
        let shared = Arc::new(MemoryStore::new());
        let store = TieredStore::new(
            disk,
            Some(shared.clone() as Arc<dyn SharedStore>),
            &config,
        );
        Fixture {
            _dir: dir,
            store,
            shared,
        }
    }

    fn key(url: &str) -> CacheKey {
        derive_url(url).expect("valid url")
    }

    fn body() -> Vec<u8> {
        b"<html><body>cached page body</body></html>".repeat(10)
    }

    #[tokio::test]
    async fn put_populates_both_tiers() {
        let fx = fixture(CacheConfig::default()).await;
        let key = key("http://example.com/blog/post-1");

        fx.store.put(&key, &body()).await.expect("put");

        assert!(fx.shared.contains(&format!("page:{key}")));
        let entry = fx.store.get(&key).await.expect("hit");
        assert_eq!(entry.body.as_ref(), body().as_slice());
        assert_eq!(entry.ttl_seconds, 604_800);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let fx = fixture(CacheConfig::default()).await;
        let key = key("http://example.com/blog/post-1");

        fx.store.put(&key, &body()).await.expect("first put");
        fx.store.put(&key, &body()).await.expect("second put");

        let entry = fx.store.get(&key).await.expect("hit");
        assert_eq!(entry.body.as_ref(), body().as_slice());
    }

    #[tokio::test]
    async fn disk_hit_repopulates_shared_tier() {
        let fx = fixture(CacheConfig::default()).await;
        let key = key("http://example.com/blog/post-1");
        let shared_key = format!("page:{key}");

        fx.store.put(&key, &body()).await.expect("put");
        fx.shared.remove(&shared_key);
        assert!(!fx.shared.contains(&shared_key));

        let entry = fx.store.get(&key).await.expect("disk hit");
        assert_eq!(entry.body.as_ref(), body().as_slice());
        assert!(fx.shared.contains(&shared_key), "write-back expected");
    }

    #[tokio::test]
    async fn delete_makes_the_key_absent_without_touching_others() {
        let fx = fixture(CacheConfig::default()).await;
        let doomed = key("http://example.com/blog/post-1");
        let kept = key("http://example.com/blog/post-2");

        fx.store.put(&doomed, &body()).await.expect("put doomed");

        // an unrelated put racing the delete must not resurrect the key
        let kept_body = body();
        let (deleted, put) = tokio::join!(
            fx.store.delete(&doomed),
            fx.store.put(&kept, &kept_body),
        );
        deleted.expect("delete");
        put.expect("put kept");

        assert!(fx.store.get(&doomed).await.is_none());
        assert!(fx.store.get(&kept).await.is_some());
    }

    #[tokio::test]
    async fn delete_prefix_drops_matching_keys_in_both_tiers() {
        let fx = fixture(CacheConfig::default()).await;
        let doomed = key("http://example.com/blog/post-1");
        let kept = key("http://example.com/blog/post-2");

        fx.store.put(&doomed, &body()).await.expect("put doomed");
        fx.store.put(&kept, &body()).await.expect("put kept");

        let removed = fx
            .store
            .delete_prefix(&doomed.as_str()[..16])
            .await
            .expect("delete prefix");
        // html + gz files plus the shared entry
        assert_eq!(removed, 3);
        assert!(fx.store.get(&doomed).await.is_none());
        assert!(fx.store.get(&kept).await.is_some());
    }

    #[tokio::test]
    async fn clear_all_empties_both_tiers() {
        let fx = fixture(CacheConfig::default()).await;
        let first = key("http://example.com/a");
        let second = key("http://example.com/b");

        fx.store.put(&first, &body()).await.expect("put");
        fx.store.put(&second, &body()).await.expect("put");

        let removed = fx.store.clear_all().await.expect("clear");
        assert!(removed >= 2);
        assert_eq!(fx.shared.len(), 0);
        assert!(fx.store.get(&first).await.is_none());
        assert!(fx.store.get(&second).await.is_none());
    }

    #[tokio::test]
    async fn expired_disk_entry_is_absent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let disk = DiskStore::open(dir.path().join("macp"))
            .await
            .expect("open disk store");
        let config = CacheConfig {
            ttl_seconds: 0,
            ..Default::default()
        };
        let store = TieredStore::new(disk, None, &config);
        let key = key("http://example.com/");

        store.put(&key, &body()).await.expect("put");
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn gzip_variant_is_written_alongside() {
        let fx = fixture(CacheConfig::default()).await;
        let key = key("http://example.com/blog/post-1");

        fx.store.put(&key, &body()).await.expect("put");
        let compressed = fx
            .store
            .disk()
            .read_compressed(&key)
            .await
            .expect("read")
            .expect("gzip variant");
        assert!(!compressed.is_empty());
    }

    #[tokio::test]
    async fn gzip_variant_skipped_when_disabled() {
        let config = CacheConfig {
            gzip: false,
            ..Default::default()
        };
        let fx = fixture(config).await;
        let key = key("http://example.com/blog/post-1");

        fx.store.put(&key, &body()).await.expect("put");
        assert!(
            fx.store
                .disk()
                .read_compressed(&key)
                .await
                .expect("read")
                .is_none()
        );
    }
}
