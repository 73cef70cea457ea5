//! MACP page cache system.
//!
//! Full-page response caching for the embedding content generator:
//!
//! - **Capture**: middleware intercepting rendered responses and committing
//!   cacheable ones to the tiered store
//! - **Tiered store**: shared Redis tier + durable filesystem tier
//! - **Invalidation**: event queue, purge planning, and Varnish fan-out
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `macp.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! min_body_bytes = 255
//! ttl_seconds = 604800
//! gzip = true
//! # ... see config.rs for all options
//! ```

mod capture;
mod config;
mod coordinator;
mod entry;
mod events;
pub mod keys;
mod lock;
mod policy;
pub mod store;
mod trigger;

pub use capture::{CacheState, HtmlPostProcessor, page_cache_layer};
pub use config::CacheConfig;
pub use coordinator::{InvalidationCoordinator, PurgePlan};
pub use entry::CacheEntry;
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::{CacheKey, KeyError, derive, derive_url};
pub use policy::{BypassReason, CacheDecision, CachePolicy, ExclusionRules};
pub use store::{DiskStore, RedisStore, SharedStore, StoreError, TieredStore};
pub use trigger::CacheTrigger;
