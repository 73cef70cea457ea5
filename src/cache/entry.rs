//! Cached page entry.

use bytes::Bytes;
use time::OffsetDateTime;

use super::keys::CacheKey;

/// One cached page as the tiered store hands it out.
///
/// Owned exclusively by the store: entries are created on commit and
/// destroyed by invalidation or TTL expiry, never mutated in place. The
/// sibling gzip variant lives at the durable storage layout level and
/// always decompresses to exactly `body`; the serving path only ever needs
/// the plain bytes.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub body: Bytes,
    pub created_at: OffsetDateTime,
    pub ttl_seconds: u64,
    pub content_type: String,
}

impl CacheEntry {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        (now - self.created_at).whole_seconds() >= self.ttl_seconds as i64
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use crate::cache::keys::derive_url;

    use super::*;

    fn entry(ttl_seconds: u64) -> CacheEntry {
        CacheEntry {
            key: derive_url("http://example.com/").expect("valid url"),
            body: Bytes::from_static(b"<html></html>"),
            created_at: OffsetDateTime::now_utc(),
            ttl_seconds,
            content_type: "text/html; charset=utf-8".to_string(),
        }
    }

    #[test]
    fn fresh_entry_is_not_expired() {
        let entry = entry(60);
        assert!(!entry.is_expired(OffsetDateTime::now_utc()));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let entry = entry(60);
        let later = entry.created_at + Duration::seconds(61);
        assert!(entry.is_expired(later));
    }

    #[test]
    fn zero_ttl_is_immediately_expired() {
        let entry = entry(0);
        assert!(entry.is_expired(entry.created_at));
    }
}
