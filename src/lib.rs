//! MACP Page Cache
//!
//! Full-page HTTP response cache for axum-based content generators, with
//! tiered storage and Varnish purge coordination:
//!
//! - **Capture**: [`cache::page_cache_layer`] buffers rendered pages,
//!   classifies them, and commits qualifying responses to the tiered store
//! - **Tiered store**: a shared Redis tier for cross-worker hits plus a
//!   durable filesystem tier holding plain and gzip variants of each page
//! - **Invalidation**: content-lifecycle events published through
//!   [`cache::CacheTrigger`] fan out to store deletions and scoped
//!   ban/PURGE requests against every configured Varnish instance
//! - **Companion config**: [`varnish::vcl::generate`] emits the Varnish
//!   configuration the purge client's wire dialect expects
//!
//! The embedding server builds a [`system::CacheSystem`] once at startup
//! and threads its parts explicitly; nothing in this crate is a global.

pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod system;
pub mod varnish;

pub use system::CacheSystem;
