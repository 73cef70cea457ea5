//! Cache key derivation.
//!
//! A key is the SHA-256 digest of the normalized
//! `scheme://host/path?sorted-query` form of a request. Cookies, headers,
//! and device class never enter the key; query parameters are sorted so
//! permuted-but-equal queries share an entry. The full digest is kept
//! because a key collision would serve one page under another's URL.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::{Url, form_urlencoded};

use crate::domain::request::RequestDescriptor;

/// Stable identifier of one cached page: lowercase hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("cannot derive a cache key from an empty url")]
    EmptyUrl,
    #[error("url `{url}` could not be parsed: {reason}")]
    Parse { url: String, reason: String },
}

/// Derive the cache key for a request.
pub fn derive(descriptor: &RequestDescriptor) -> CacheKey {
    hash_canonical(&canonical_form(
        &descriptor.scheme,
        &descriptor.host,
        &descriptor.path,
        &descriptor.query,
    ))
}

/// Derive the cache key for an absolute URL.
///
/// Used by the invalidation coordinator to purge pages the current request
/// did not itself render. Produces the same key [`derive`] would produce
/// for a request to that URL.
pub fn derive_url(url: &str) -> Result<CacheKey, KeyError> {
    if url.trim().is_empty() {
        return Err(KeyError::EmptyUrl);
    }
    let parsed = Url::parse(url).map_err(|err| KeyError::Parse {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    Ok(hash_canonical(&canonical_form(
        parsed.scheme(),
        &host,
        parsed.path(),
        parsed.query().unwrap_or(""),
    )))
}

fn canonical_form(scheme: &str, host: &str, path: &str, query: &str) -> String {
    let scheme = if scheme.is_empty() {
        "http".to_string()
    } else {
        scheme.to_ascii_lowercase()
    };
    let mut host = host.to_ascii_lowercase();
    let default_port = match scheme.as_str() {
        "https" => ":443",
        _ => ":80",
    };
    if let Some(stripped) = host.strip_suffix(default_port) {
        host = stripped.to_string();
    }
    let path = if path.is_empty() { "/" } else { path };

    let query = normalize_query(query);
    if query.is_empty() {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}{path}?{query}")
    }
}

fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn hash_canonical(canonical: &str) -> CacheKey {
    CacheKey(hex::encode(Sha256::digest(canonical.as_bytes())))
}
