//! Response capture pipeline.
//!
//! Classifies each request before any buffering, serves hits from the
//! tiered store, and commits qualifying generated responses. Per request
//! the pipeline moves UNCLASSIFIED → {BYPASS | CAPTURING} → {COMMITTED |
//! DISCARDED}; nothing that goes wrong on the caching path may fail the
//! response itself.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use lol_html::{HtmlRewriter, Settings, element, html_content::ContentType};
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::domain::request::{CanonicalHint, DescriptorPolicy, RequestDescriptor};

use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::keys::{self, CacheKey};
use super::policy::{CacheDecision, CachePolicy};
use super::store::TieredStore;

const METRIC_MISS: &str = "macp_page_cache_miss_total";
const METRIC_COMMIT: &str = "macp_page_cache_commit_total";

/// External HTML post-processing hook, applied after canonical injection
/// and before the body is committed. Out of scope for the cache itself.
pub trait HtmlPostProcessor: Send + Sync {
    fn process(&self, body: Bytes) -> Bytes;
}

/// Shared cache state for the middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub policy: Arc<CachePolicy>,
    pub descriptors: Arc<DescriptorPolicy>,
    pub store: Arc<TieredStore>,
    pub post_processor: Option<Arc<dyn HtmlPostProcessor>>,
}

/// Full-page cache middleware.
///
/// Install with `axum::middleware::from_fn_with_state(state,
/// page_cache_layer)` outside the routes that render public pages.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.enabled {
        return next.run(request).await;
    }

    let descriptor = RequestDescriptor::from_request(&request, &state.descriptors);
    match state.policy.classify(&descriptor) {
        CacheDecision::Bypass(reason) => {
            debug!(
                outcome = "bypass",
                reason = reason.as_str(),
                device = descriptor.device.as_str(),
                "page cache bypass"
            );
            let mut response = next.run(request).await;
            apply_bypass_headers(response.headers_mut());
            response
        }
        CacheDecision::Cacheable => {
            let key = keys::derive(&descriptor);
            if let Some(entry) = state.store.get(&key).await {
                debug!(outcome = "hit", key = %key, "serving cached page");
                return serve_hit(&state.config, entry);
            }
            let response = next.run(request).await;
            capture_response(&state, &key, response).await
        }
    }
}

/// Buffer a freshly generated response and commit it when it qualifies.
async fn capture_response(state: &CacheState, key: &CacheKey, response: Response) -> Response {
    if response.status() != StatusCode::OK {
        debug!(
            outcome = "discarded",
            status = response.status().as_u16(),
            "response status not cacheable"
        );
        return response;
    }

    let canonical = response.extensions().get::<CanonicalHint>().cloned();
    let (mut parts, body) = response.into_parts();
    let mut body_bytes = match BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, "failed to buffer response body, skipping capture");
            return Response::from_parts(parts, Body::empty());
        }
    };

    if body_bytes.len() < state.config.min_body_bytes {
        counter!(METRIC_MISS).increment(1);
        debug!(
            outcome = "discarded",
            bytes = body_bytes.len(),
            "body below minimum cacheable length"
        );
        return Response::from_parts(parts, Body::from(body_bytes));
    }

    if let Some(CanonicalHint(url)) = canonical {
        match inject_canonical(&body_bytes, &url) {
            Ok(Some(rewritten)) => {
                body_bytes = rewritten;
                parts.headers.remove(header::CONTENT_LENGTH);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "canonical link injection failed"),
        }
    }

    if let Some(processor) = &state.post_processor {
        body_bytes = processor.process(body_bytes);
        parts.headers.remove(header::CONTENT_LENGTH);
    }

    match state.store.put(key, &body_bytes).await {
        Ok(()) => {
            counter!(METRIC_COMMIT).increment(1);
            debug!(
                outcome = "committed",
                key = %key,
                bytes = body_bytes.len(),
                "page committed to cache"
            );
            apply_cache_headers(&mut parts.headers, "ACTIVE", &state.config);
        }
        Err(err) => {
            counter!(METRIC_MISS).increment(1);
            warn!(key = %key, error = %err, "cache commit failed, serving uncached response");
        }
    }

    Response::from_parts(parts, Body::from(body_bytes))
}

/// Build a response from a stored entry.
fn serve_hit(config: &CacheConfig, entry: CacheEntry) -> Response {
    let mut response = Response::new(Body::from(entry.body));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&entry.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    apply_cache_headers(headers, "HIT", config);
    response
}

fn apply_cache_headers(headers: &mut HeaderMap, status: &'static str, config: &CacheConfig) {
    headers.insert(
        HeaderName::from_static("x-macp-cache"),
        HeaderValue::from_static(status),
    );
    headers.insert(
        HeaderName::from_static("x-macp-cache-ttl"),
        HeaderValue::from(config.ttl_seconds),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", config.ttl_seconds)) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    let vary = if config.vary_cookie {
        HeaderValue::from_static("Accept-Encoding, Cookie")
    } else {
        HeaderValue::from_static("Accept-Encoding")
    };
    headers.insert(header::VARY, vary);
}

fn apply_bypass_headers(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("x-macp-cache"),
        HeaderValue::from_static("BYPASS"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
    );
}

/// Append a canonical link tag before `</head>` unless the document
/// already carries one. Returns `None` when nothing changed.
fn inject_canonical(
    body: &Bytes,
    canonical_url: &str,
) -> Result<Option<Bytes>, lol_html::errors::RewritingError> {
    if contains_subslice(body, b"rel=\"canonical\"") || contains_subslice(body, b"rel='canonical'")
    {
        return Ok(None);
    }

    let tag = format!(
        "<link rel=\"canonical\" href=\"{}\" />\n",
        attribute_escape(canonical_url)
    );
    let mut output = Vec::with_capacity(body.len() + tag.len());
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("head", |el| {
                el.append(&tag, ContentType::Html);
                Ok(())
            })],
            ..Settings::new()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );
    rewriter.write(body)?;
    rewriter.end()?;
    Ok(Some(Bytes::from(output)))
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn attribute_escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
