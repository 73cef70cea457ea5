//! Runtime cache configuration.
//!
//! Built once from the typed settings and passed by reference to the
//! components that need it.

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MIN_BODY_BYTES: usize = 255;
/// Matches the Varnish default object lifetime so both layers expire in
/// lockstep.
const DEFAULT_TTL_SECONDS: u64 = 604_800;
const DEFAULT_NAMESPACE: &str = "page:";
const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

/// Cache behavior knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the page cache as a whole.
    pub enabled: bool,
    /// Bodies shorter than this are not worth caching.
    pub min_body_bytes: usize,
    /// Entry lifetime across both tiers.
    pub ttl_seconds: u64,
    /// Write a gzip variant next to each plain entry.
    pub gzip: bool,
    /// Add `Cookie` to the `Vary` header (set when Varnish fronts the
    /// origin, so cookie presence never serves a cached body cross-session).
    pub vary_cookie: bool,
    /// Key prefix in the shared tier.
    pub namespace: String,
    /// Content type served for cached pages.
    pub content_type: String,
    /// Auto-consume interval (ms) for eventual consistency.
    pub auto_consume_interval_ms: u64,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_body_bytes: DEFAULT_MIN_BODY_BYTES,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            gzip: true,
            vary_cookie: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            min_body_bytes: settings.min_body_bytes,
            ttl_seconds: settings.ttl_seconds.get(),
            gzip: settings.gzip,
            vary_cookie: false,
            namespace: settings.namespace.clone(),
            content_type: settings.content_type.clone(),
            auto_consume_interval_ms: settings.auto_consume_interval_ms.get(),
            consume_batch_limit: settings.consume_batch_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.min_body_bytes, 255);
        assert_eq!(config.ttl_seconds, 604_800);
        assert!(config.gzip);
        assert!(!config.vary_cookie);
        assert_eq!(config.namespace, "page:");
        assert_eq!(config.auto_consume_interval_ms, 5000);
        assert_eq!(config.consume_batch_limit, 100);
    }
}
