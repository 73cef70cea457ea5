//! Invalidation coordination.
//!
//! Drains the event queue, folds the batch into a purge plan, and executes
//! it against the tiered store and the edge proxy. Partial failures are
//! logged and never abort the remaining work.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument, warn};

use crate::domain::content::{ContentId, ContentResolver};
use crate::varnish::VarnishClient;

use super::config::CacheConfig;
use super::events::{CacheEvent, EventKind, EventQueue};
use super::keys;
use super::store::TieredStore;

const METRIC_CONSUME_MS: &str = "macp_cache_consume_ms";

/// Folded view of one event batch.
///
/// Every event kind collapses to deletion work, so set union is enough;
/// duplicate events (same id) and repeated scopes cost nothing extra.
#[derive(Debug, Default)]
pub struct PurgePlan {
    /// Both tiers and the edge cache drop everything.
    pub flush_all: bool,
    /// Content ids to resolve into canonical + related URLs.
    pub content_ids: BTreeSet<ContentId>,
    /// URLs invalidated directly.
    pub urls: BTreeSet<String>,
}

impl fmt::Display for PurgePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PurgePlan {{ flush_all: {}, content_ids: {}, urls: {} }}",
            self.flush_all,
            self.content_ids.len(),
            self.urls.len(),
        )
    }
}

impl PurgePlan {
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = BTreeSet::new();

        for event in events {
            if !seen_ids.insert(event.id) {
                continue;
            }
            match event.kind {
                EventKind::ContentPublished { content_id }
                | EventKind::ContentUpdated { content_id }
                | EventKind::ContentTrashed { content_id }
                | EventKind::CommentPosted { content_id } => {
                    plan.content_ids.insert(content_id);
                }
                EventKind::UrlTouched { url } => {
                    plan.urls.insert(url);
                }
                EventKind::ThemeSwitched | EventKind::FlushAll => {
                    plan.flush_all = true;
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        !self.flush_all && self.content_ids.is_empty() && self.urls.is_empty()
    }
}

/// Consumes invalidation events and keeps the store and the edge cache in
/// step with content changes.
pub struct InvalidationCoordinator {
    config: CacheConfig,
    store: Arc<TieredStore>,
    varnish: Option<Arc<VarnishClient>>,
    resolver: Arc<dyn ContentResolver>,
    queue: Arc<EventQueue>,
}

impl InvalidationCoordinator {
    pub fn new(
        config: CacheConfig,
        store: Arc<TieredStore>,
        varnish: Option<Arc<VarnishClient>>,
        resolver: Arc<dyn ContentResolver>,
        queue: Arc<EventQueue>,
    ) -> Self {
        Self {
            config,
            store,
            varnish,
            resolver,
            queue,
        }
    }

    /// Drain pending events and execute the resulting plan.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let started = Instant::now();
        let events = self.queue.drain(self.config.consume_batch_limit);
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let plan = PurgePlan::from_events(events);
        info!(event_count, plan = %plan, "invalidation starting");

        if plan.flush_all {
            self.flush_all().await;
        } else {
            let urls = self.expand(&plan).await;
            for url in &urls {
                self.invalidate_url(url).await;
            }
        }

        info!(event_count, "invalidation complete");
        histogram!(METRIC_CONSUME_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        true
    }

    async fn flush_all(&self) {
        match self.store.clear_all().await {
            Ok(removed) => info!(removed, "cleared all cache tiers"),
            Err(err) => warn!(error = %err, "global cache clear failed"),
        }
        if let Some(varnish) = &self.varnish {
            let report = varnish.purge_all().await;
            if !report.is_complete() {
                warn!(
                    attempted = report.attempted,
                    succeeded = report.succeeded,
                    "global purge reached only part of the edge targets"
                );
            }
        }
    }

    /// Resolve every scope in the plan down to the concrete URL set to
    /// invalidate. Content changes must not leave stale aggregate views,
    /// so each URL brings its related listing/taxonomy pages along.
    async fn expand(&self, plan: &PurgePlan) -> BTreeSet<String> {
        let mut urls = BTreeSet::new();
        for id in &plan.content_ids {
            match self.resolver.resolve_content(*id).await {
                Ok(Some(resolved)) => {
                    urls.insert(resolved.url);
                    urls.extend(resolved.related);
                }
                Ok(None) => warn!(content_id = %id, "content id did not resolve to a url"),
                Err(err) => warn!(content_id = %id, error = %err, "content resolution failed"),
            }
        }
        for url in &plan.urls {
            urls.insert(url.clone());
            match self.resolver.related_urls(url).await {
                Ok(related) => urls.extend(related),
                Err(err) => warn!(url = %url, error = %err, "related url resolution failed"),
            }
        }
        urls
    }

    async fn invalidate_url(&self, url: &str) {
        let key = match keys::derive_url(url) {
            Ok(key) => key,
            Err(err) => {
                warn!(url = %url, error = %err, "skipping url with underivable key");
                return;
            }
        };
        if let Err(err) = self.store.delete(&key).await {
            warn!(url = %url, key = %key, error = %err, "cache delete failed");
        }
        if let Some(varnish) = &self.varnish {
            let report = varnish.purge_url(url).await;
            if !report.is_complete() {
                warn!(
                    url = %url,
                    attempted = report.attempted,
                    succeeded = report.succeeded,
                    "scoped purge reached only part of the edge targets"
                );
            }
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }
}
