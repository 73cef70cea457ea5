//! Content identity and URL resolution.
//!
//! The cache never knows how the content generator maps ids to URLs; the
//! [`ContentResolver`] seam supplies that mapping during invalidation.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Identifier of a content item (post, page) in the generating application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId(pub u64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical URL of a content item plus the aggregate views it appears in.
///
/// `related` carries the parent listing/archive URLs and taxonomy term pages
/// that must be invalidated together with the item itself.
#[derive(Debug, Clone)]
pub struct ResolvedContent {
    pub url: String,
    pub related: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("content lookup failed: {message}")]
    Lookup { message: String },
}

impl ResolveError {
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }
}

/// Resolves content ids and URLs to the full set of URLs an invalidation
/// must cover. Implemented by the embedding application.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Canonical URL and related aggregate URLs for a content id, or `None`
    /// when the id is unknown.
    async fn resolve_content(&self, id: ContentId)
    -> Result<Option<ResolvedContent>, ResolveError>;

    /// Aggregate URLs structurally related to an already-known URL.
    async fn related_urls(&self, url: &str) -> Result<Vec<String>, ResolveError>;
}
