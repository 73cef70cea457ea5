//! Composition root.
//!
//! Builds every cache component exactly once from validated settings and
//! hands the embedding server the pieces it threads through its router and
//! write paths. There are no lazily-initialized globals anywhere in the
//! crate.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::cache::{
    CacheConfig, CachePolicy, CacheState, CacheTrigger, DiskStore, EventQueue, HtmlPostProcessor,
    InvalidationCoordinator, RedisStore, SharedStore, StoreError, TieredStore,
};
use crate::config::Settings;
use crate::domain::content::ContentResolver;
use crate::domain::request::DescriptorPolicy;
use crate::varnish::VarnishClient;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid exclusion or request pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The assembled page-cache system.
pub struct CacheSystem {
    /// State for [`crate::cache::page_cache_layer`].
    pub state: CacheState,
    /// Write-side API for content-lifecycle events.
    pub trigger: Arc<CacheTrigger>,
    pub coordinator: Arc<InvalidationCoordinator>,
    pub varnish: Option<Arc<VarnishClient>>,
}

impl CacheSystem {
    /// Construct every component from settings. The resolver is the
    /// embedding application's content-id → URL mapping.
    pub async fn build(
        settings: &Settings,
        resolver: Arc<dyn ContentResolver>,
    ) -> Result<Self, BuildError> {
        let mut config = CacheConfig::from(&settings.cache);
        // cookie presence must not silently serve a cached body to another
        // session once the edge cache fronts the origin
        config.vary_cookie = settings.varnish.enabled;

        let policy = Arc::new(CachePolicy::new(settings.exclusions.clone())?);
        let descriptors = Arc::new(DescriptorPolicy::new(&settings.request)?);

        let disk = DiskStore::open(&settings.disk.root).await?;
        let shared: Option<Arc<dyn SharedStore>> = match &settings.shared.url {
            Some(url) => {
                let store = RedisStore::connect(url).await?;
                info!("shared cache tier connected");
                Some(Arc::new(store))
            }
            None => None,
        };
        let store = Arc::new(TieredStore::new(disk, shared, &config));

        let varnish = settings
            .varnish
            .enabled
            .then(|| Arc::new(VarnishClient::new(&settings.varnish)));

        let queue = Arc::new(EventQueue::new());
        let coordinator = Arc::new(InvalidationCoordinator::new(
            config.clone(),
            store.clone(),
            varnish.clone(),
            resolver,
            queue.clone(),
        ));
        let trigger = Arc::new(CacheTrigger::new(
            config.clone(),
            queue,
            coordinator.clone(),
        ));

        let state = CacheState {
            config,
            policy,
            descriptors,
            store,
            post_processor: None,
        };

        Ok(Self {
            state,
            trigger,
            coordinator,
            varnish,
        })
    }

    /// Attach the external HTML post-processing step.
    pub fn with_post_processor(mut self, processor: Arc<dyn HtmlPostProcessor>) -> Self {
        self.state.post_processor = Some(processor);
        self
    }

    /// Spawn the interval task that picks up events no write path
    /// consumed immediately, keeping invalidation eventually consistent.
    pub fn spawn_auto_consume(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let interval_ms = self.state.config.auto_consume_interval_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.tick().await; // skip the first immediate tick
            loop {
                interval.tick().await;
                coordinator.consume().await;
            }
        })
    }
}
