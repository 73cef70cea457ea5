//! Invalidation trigger service.
//!
//! High-level API for publishing invalidation events from content-lifecycle
//! write paths, optionally consuming them immediately.

use std::sync::Arc;

use tracing::debug;

use crate::domain::content::ContentId;

use super::config::CacheConfig;
use super::coordinator::InvalidationCoordinator;
use super::events::{EventKind, EventQueue};

/// Facade over the event queue and coordinator.
///
/// # Usage
///
/// ```ignore
/// // After a successful content update:
/// trigger.content_updated(post_id).await;
/// ```
pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    coordinator: Arc<InvalidationCoordinator>,
}

impl CacheTrigger {
    pub fn new(
        config: CacheConfig,
        queue: Arc<EventQueue>,
        coordinator: Arc<InvalidationCoordinator>,
    ) -> Self {
        Self {
            config,
            queue,
            coordinator,
        }
    }

    /// Publish an event and optionally consume immediately.
    ///
    /// With `consume_now` false, the event waits for the auto-consume
    /// interval or the next explicit consumption.
    pub async fn trigger(&self, kind: EventKind, consume_now: bool) {
        if !self.config.enabled {
            debug!(event_kind = ?kind, "invalidation trigger skipped: cache disabled");
            return;
        }

        self.queue.publish(kind);

        if consume_now {
            self.coordinator.consume().await;
        }
    }

    pub async fn content_published(&self, content_id: ContentId) {
        self.trigger(EventKind::ContentPublished { content_id }, true)
            .await;
    }

    pub async fn content_updated(&self, content_id: ContentId) {
        self.trigger(EventKind::ContentUpdated { content_id }, true)
            .await;
    }

    pub async fn content_trashed(&self, content_id: ContentId) {
        self.trigger(EventKind::ContentTrashed { content_id }, true)
            .await;
    }

    pub async fn comment_posted(&self, content_id: ContentId) {
        self.trigger(EventKind::CommentPosted { content_id }, true)
            .await;
    }

    pub async fn url_touched(&self, url: &str) {
        self.trigger(
            EventKind::UrlTouched {
                url: url.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn theme_switched(&self) {
        self.trigger(EventKind::ThemeSwitched, true).await;
    }

    pub async fn flush_all(&self) {
        self.trigger(EventKind::FlushAll, true).await;
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn coordinator(&self) -> &Arc<InvalidationCoordinator> {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::cache::store::{DiskStore, TieredStore};
    use crate::domain::content::{ContentResolver, ResolveError, ResolvedContent};

    use super::*;

    struct NullResolver;

    #[async_trait]
    impl ContentResolver for NullResolver {
        async fn resolve_content(
            &self,
            _id: ContentId,
        ) -> Result<Option<ResolvedContent>, ResolveError> {
            Ok(None)
        }

        async fn related_urls(&self, _url: &str) -> Result<Vec<String>, ResolveError> {
            Ok(Vec::new())
        }
    }

    async fn trigger_with(config: CacheConfig) -> (tempfile::TempDir, CacheTrigger) {
        let dir = tempfile::tempdir().expect("temp dir");
        let disk = DiskStore::open(dir.path().join("macp"))
            .await
            .expect("open disk store");
        let store = Arc::new(TieredStore::new(disk, None, &config));
        let queue = Arc::new(EventQueue::new());
        let coordinator = Arc::new(InvalidationCoordinator::new(
            config.clone(),
            store,
            None,
            Arc::new(NullResolver),
            queue.clone(),
        ));
        (dir, CacheTrigger::new(config, queue, coordinator))
    }

    #[tokio::test]
    async fn trigger_publishes_event() {
        let (_dir, trigger) = trigger_with(CacheConfig::default()).await;

        assert!(trigger.queue().is_empty());
        trigger.trigger(EventKind::ThemeSwitched, false).await;
        assert_eq!(trigger.queue().len(), 1);
    }

    #[tokio::test]
    async fn trigger_respects_disabled_config() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let (_dir, trigger) = trigger_with(config).await;

        trigger.content_updated(ContentId(1)).await;
        assert!(trigger.queue().is_empty());
    }

    #[tokio::test]
    async fn convenience_methods_consume_immediately() {
        let (_dir, trigger) = trigger_with(CacheConfig::default()).await;

        trigger.content_published(ContentId(1)).await;
        trigger.content_updated(ContentId(1)).await;
        trigger.content_trashed(ContentId(1)).await;
        trigger.comment_posted(ContentId(1)).await;
        trigger.url_touched("http://example.com/").await;
        trigger.theme_switched().await;
        trigger.flush_all().await;

        assert!(trigger.queue().is_empty());
    }
}
