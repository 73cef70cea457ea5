//! Durable filesystem tier.
//!
//! One file per key: `<root>/<key>.html` plus an optional
//! `<root>/<key>.html.gz` sibling. The root carries an empty placeholder
//! file so a misconfigured web server cannot produce a directory listing.
//! Writes go to a temp file first and land via atomic rename, so concurrent
//! writers to the same key cannot corrupt either variant.

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use time::OffsetDateTime;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use super::StoreError;
use crate::cache::keys::CacheKey;

pub(crate) const PLACEHOLDER_FILE: &str = "index.html";
const HTML_SUFFIX: &str = ".html";
const GZIP_SUFFIX: &str = ".html.gz";

/// A page read back from disk, stamped with its file mtime.
pub(crate) struct DiskHit {
    pub body: Bytes,
    pub created_at: OffsetDateTime,
}

pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) the cache root and its placeholder file.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::io(&root, source))?;
        let placeholder = root.join(PLACEHOLDER_FILE);
        if fs::metadata(&placeholder).await.is_err() {
            fs::write(&placeholder, b"")
                .await
                .map_err(|source| StoreError::io(&placeholder, source))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn html_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}{HTML_SUFFIX}", key.as_str()))
    }

    fn gzip_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}{GZIP_SUFFIX}", key.as_str()))
    }

    /// Read the plain variant, honoring the TTL: an entry older than
    /// `ttl_seconds` counts as absent and its files are removed.
    pub(crate) async fn read(
        &self,
        key: &CacheKey,
        ttl_seconds: u64,
    ) -> Result<Option<DiskHit>, StoreError> {
        let path = self.html_path(key);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(_) => return Ok(None),
        };
        let modified = meta.modified().ok();
        if let Some(modified) = modified
            && modified
                .elapsed()
                .map(|age| age.as_secs() >= ttl_seconds)
                .unwrap_or(false)
        {
            if let Err(err) = self.remove(key).await {
                warn!(key = %key, error = %err, "failed to drop expired cache files");
            }
            return Ok(None);
        }
        let body = fs::read(&path)
            .await
            .map_err(|source| StoreError::io(&path, source))?;
        Ok(Some(DiskHit {
            body: Bytes::from(body),
            created_at: modified
                .map(OffsetDateTime::from)
                .unwrap_or_else(OffsetDateTime::now_utc),
        }))
    }

    /// Read the gzip variant without TTL interpretation.
    pub async fn read_compressed(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.gzip_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::io(&path, source)),
        }
    }

    pub async fn write(&self, key: &CacheKey, body: &[u8]) -> Result<(), StoreError> {
        self.write_atomic(&self.html_path(key), body).await
    }

    pub async fn write_gzip(&self, key: &CacheKey, body: &[u8]) -> Result<(), StoreError> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::best());
        encoder.write_all(body).map_err(StoreError::Compression)?;
        let compressed = encoder.finish().map_err(StoreError::Compression)?;
        self.write_atomic(&self.gzip_path(key), &compressed).await
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let temp = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&temp, contents)
            .await
            .map_err(|source| StoreError::io(&temp, source))?;
        if let Err(source) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StoreError::io(path, source));
        }
        Ok(())
    }

    /// Remove both variants for a key. Missing files are not an error.
    pub async fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        for path in [self.html_path(key), self.gzip_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::io(&path, source)),
            }
        }
        Ok(())
    }

    /// Remove every entry whose key starts with `prefix`.
    pub async fn remove_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.remove_matching(|name| name.starts_with(prefix)).await
    }

    /// Drop every cached variant in one directory pass, keeping the
    /// placeholder. Used for global invalidation.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        self.remove_matching(|_| true).await
    }

    async fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> Result<u64, StoreError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|source| StoreError::io(&self.root, source))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| StoreError::io(&self.root, source))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == PLACEHOLDER_FILE
                || !(name.ends_with(HTML_SUFFIX) || name.ends_with(GZIP_SUFFIX))
                || !matches(&name)
            {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "failed to remove cache file");
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use crate::cache::keys::derive_url;

    use super::*;

    async fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = DiskStore::open(dir.path().join("macp"))
            .await
            .expect("open disk store");
        (dir, store)
    }

    fn key(url: &str) -> CacheKey {
        derive_url(url).expect("valid url")
    }

    #[tokio::test]
    async fn open_creates_placeholder() {
        let (_dir, store) = store().await;
        assert!(store.root().join(PLACEHOLDER_FILE).exists());
    }

    #[tokio::test]
    async fn write_read_roundtrip() {
        let (_dir, store) = store().await;
        let key = key("http://example.com/blog/post-1");

        store.write(&key, b"<html>post</html>").await.expect("write");
        let hit = store.read(&key, 60).await.expect("read").expect("hit");
        assert_eq!(hit.body.as_ref(), b"<html>post</html>");
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent_and_files_are_dropped() {
        let (_dir, store) = store().await;
        let key = key("http://example.com/blog/post-1");

        store.write(&key, b"<html>post</html>").await.expect("write");
        store.write_gzip(&key, b"<html>post</html>").await.expect("write gzip");

        let hit = store.read(&key, 0).await.expect("read");
        assert!(hit.is_none());
        assert!(store.read_compressed(&key).await.expect("read gz").is_none());
    }

    #[tokio::test]
    async fn gzip_variant_roundtrips_to_the_plain_body() {
        let (_dir, store) = store().await;
        let key = key("http://example.com/blog/post-1");
        let body = b"<html>".repeat(100);

        store.write_gzip(&key, &body).await.expect("write gzip");
        let compressed = store
            .read_compressed(&key)
            .await
            .expect("read")
            .expect("gzip variant");

        let mut decoder = GzDecoder::new(compressed.as_ref());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).expect("decompress");
        assert_eq!(decompressed, body);
    }

    #[tokio::test]
    async fn overwrite_replaces_contents() {
        let (_dir, store) = store().await;
        let key = key("http://example.com/");

        store.write(&key, b"first version").await.expect("write");
        store.write(&key, b"second version").await.expect("rewrite");

        let hit = store.read(&key, 60).await.expect("read").expect("hit");
        assert_eq!(hit.body.as_ref(), b"second version");
    }

    #[tokio::test]
    async fn remove_drops_both_variants() {
        let (_dir, store) = store().await;
        let key = key("http://example.com/");

        store.write(&key, b"body").await.expect("write");
        store.write_gzip(&key, b"body").await.expect("write gzip");
        store.remove(&key).await.expect("remove");

        assert!(store.read(&key, 60).await.expect("read").is_none());
        assert!(store.read_compressed(&key).await.expect("read gz").is_none());

        // removing again is a no-op
        store.remove(&key).await.expect("second remove");
    }

    #[tokio::test]
    async fn clear_keeps_the_placeholder() {
        let (_dir, store) = store().await;
        let first = key("http://example.com/a");
        let second = key("http://example.com/b");

        store.write(&first, b"a page body").await.expect("write");
        store.write(&second, b"b page body").await.expect("write");
        store.write_gzip(&second, b"b page body").await.expect("write gzip");

        let removed = store.clear().await.expect("clear");
        assert_eq!(removed, 3);
        assert!(store.root().join(PLACEHOLDER_FILE).exists());
        assert!(store.read(&first, 60).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn remove_prefix_only_touches_matching_keys() {
        let (_dir, store) = store().await;
        let kept = key("http://example.com/kept");
        let dropped = key("http://example.com/dropped");

        store.write(&kept, b"kept body").await.expect("write");
        store.write(&dropped, b"dropped body").await.expect("write");

        let removed = store
            .remove_prefix(&dropped.as_str()[..16])
            .await
            .expect("remove prefix");
        assert_eq!(removed, 1);
        assert!(store.read(&kept, 60).await.expect("read").is_some());
        assert!(store.read(&dropped, 60).await.expect("read").is_none());
    }
}
