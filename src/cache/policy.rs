//! Cacheability classification.
//!
//! Decides, per request and before any buffering begins, whether a response
//! may be captured. Deterministic and side-effect-free apart from
//! diagnostic logging, so it is unit testable without a live request.

use axum::http::Method;
use regex::RegexSet;
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::domain::request::{RequestDescriptor, ViewKind};

/// Externally supplied exclusion rules, read-only at request time.
///
/// This is the page-cache rule set; the Varnish-side exclusions are a
/// separate, independently configured list consumed by the VCL generator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExclusionRules {
    /// Substring matches against the request path.
    pub paths: Vec<String>,
    /// Query parameter names whose presence bypasses the cache.
    pub query_params: Vec<String>,
    /// Regex patterns matched against the request path.
    pub path_patterns: Vec<String>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            paths: [
                "/login",
                "/admin",
                "/cart/",
                "/checkout/",
                "/account/",
                "add-to-cart",
                "logout",
                "lost-password",
                "register",
                "/xmlrpc",
                "/cron",
            ]
            .map(str::to_string)
            .to_vec(),
            query_params: ["__SID", "noCache"].map(str::to_string).to_vec(),
            path_patterns: Vec::new(),
        }
    }
}

/// Why a request was not cacheable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    MalformedDescriptor,
    AdminContext,
    AuthenticatedSession,
    Method,
    ExcludedPath,
    ExcludedParam,
    ExcludedPattern,
    SearchView,
    PagedListing,
}

impl BypassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassReason::MalformedDescriptor => "malformed_descriptor",
            BypassReason::AdminContext => "admin_context",
            BypassReason::AuthenticatedSession => "authenticated_session",
            BypassReason::Method => "method",
            BypassReason::ExcludedPath => "excluded_path",
            BypassReason::ExcludedParam => "excluded_param",
            BypassReason::ExcludedPattern => "excluded_pattern",
            BypassReason::SearchView => "search_view",
            BypassReason::PagedListing => "paged_listing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Cacheable,
    Bypass(BypassReason),
}

/// Compiled classifier over one [`ExclusionRules`] set.
pub struct CachePolicy {
    rules: ExclusionRules,
    patterns: RegexSet,
}

impl CachePolicy {
    pub fn new(rules: ExclusionRules) -> Result<Self, regex::Error> {
        let patterns = RegexSet::new(&rules.path_patterns)?;
        Ok(Self { rules, patterns })
    }

    /// First matching rule wins; a descriptor that survives every rule is
    /// cacheable.
    pub fn classify(&self, descriptor: &RequestDescriptor) -> CacheDecision {
        if descriptor.path.is_empty() {
            return CacheDecision::Bypass(BypassReason::MalformedDescriptor);
        }
        if descriptor.admin_context {
            return CacheDecision::Bypass(BypassReason::AdminContext);
        }
        if descriptor.authenticated {
            return CacheDecision::Bypass(BypassReason::AuthenticatedSession);
        }
        if descriptor.method != Method::GET {
            return CacheDecision::Bypass(BypassReason::Method);
        }
        for pattern in &self.rules.paths {
            if descriptor.path.contains(pattern.as_str()) {
                debug!(
                    path = %descriptor.path,
                    pattern = %pattern,
                    "not caching: excluded path rule matched"
                );
                return CacheDecision::Bypass(BypassReason::ExcludedPath);
            }
        }
        if !self.rules.query_params.is_empty()
            && form_urlencoded::parse(descriptor.query.as_bytes())
                .any(|(name, _)| self.rules.query_params.iter().any(|p| p == name.as_ref()))
        {
            return CacheDecision::Bypass(BypassReason::ExcludedParam);
        }
        if !self.rules.path_patterns.is_empty() && self.patterns.is_match(&descriptor.path) {
            debug!(path = %descriptor.path, "not caching: excluded pattern rule matched");
            return CacheDecision::Bypass(BypassReason::ExcludedPattern);
        }
        match descriptor.view {
            ViewKind::Search => CacheDecision::Bypass(BypassReason::SearchView),
            ViewKind::PagedListing { .. } => CacheDecision::Bypass(BypassReason::PagedListing),
            ViewKind::Plain => CacheDecision::Cacheable,
        }
    }

    pub fn is_cacheable(&self, descriptor: &RequestDescriptor) -> bool {
        matches!(self.classify(descriptor), CacheDecision::Cacheable)
    }
}
