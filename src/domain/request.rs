//! Per-request descriptor.
//!
//! One [`RequestDescriptor`] is constructed per inbound request from
//! explicit request parts and threaded through classification and key
//! derivation. No component reads ambient request state.

use axum::http::{Method, Request, header};
use regex::Regex;
use url::form_urlencoded;

use crate::config::RequestSettings;

/// User-agent pattern marking handheld clients, mirrored by the generated
/// Varnish configuration.
const DEVICE_PATTERN: &str = "(?i)mobile|android|iphone|ipad|tablet";

/// Rough client device classification derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
        }
    }
}

/// View kind inferred from URL space alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// Search-result view.
    Search,
    /// Listing/archive view beyond its first page.
    PagedListing { page: u32 },
    /// Anything else.
    Plain,
}

/// Response extension attached by the content generator on singular content
/// pages, carrying the permalink to inject as a canonical link tag.
#[derive(Debug, Clone)]
pub struct CanonicalHint(pub String);

/// Compiled rules for turning raw requests into descriptors.
pub struct DescriptorPolicy {
    session_cookies: Vec<String>,
    admin_path_prefix: String,
    search_paths: Vec<String>,
    search_params: Vec<String>,
    page_param: String,
    device_pattern: Regex,
}

impl DescriptorPolicy {
    pub fn new(settings: &RequestSettings) -> Result<Self, regex::Error> {
        Ok(Self {
            session_cookies: settings.session_cookies.clone(),
            admin_path_prefix: settings.admin_path_prefix.clone(),
            search_paths: settings.search_paths.clone(),
            search_params: settings.search_params.clone(),
            page_param: settings.page_param.clone(),
            device_pattern: Regex::new(DEVICE_PATTERN)?,
        })
    }
}

/// Everything the cache needs to know about one request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub scheme: String,
    pub host: String,
    pub path: String,
    /// Raw query string, empty when absent.
    pub query: String,
    /// Names of cookies present on the request.
    pub cookies: Vec<String>,
    pub authenticated: bool,
    pub admin_context: bool,
    pub device: DeviceClass,
    pub view: ViewKind,
}

impl RequestDescriptor {
    /// Build a descriptor from request parts. Infallible: missing or odd
    /// inputs degrade to values the classifier treats conservatively.
    pub fn from_request<B>(request: &Request<B>, policy: &DescriptorPolicy) -> Self {
        let uri = request.uri();
        let path = uri.path().to_string();
        let query = uri.query().unwrap_or("").to_string();

        let host = uri
            .host()
            .map(str::to_string)
            .or_else(|| header_str(request, header::HOST))
            .unwrap_or_default();
        let scheme = uri.scheme_str().unwrap_or("http").to_string();

        let cookies = cookie_names(request);
        let authenticated = cookies.iter().any(|name| {
            policy
                .session_cookies
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
        });
        let admin_context = !policy.admin_path_prefix.is_empty()
            && path.starts_with(policy.admin_path_prefix.as_str());

        let device = match header_str(request, header::USER_AGENT) {
            Some(agent) if policy.device_pattern.is_match(&agent) => DeviceClass::Mobile,
            _ => DeviceClass::Desktop,
        };

        let view = infer_view(&path, &query, policy);

        Self {
            method: request.method().clone(),
            scheme,
            host,
            path,
            query,
            cookies,
            authenticated,
            admin_context,
            device,
            view,
        }
    }
}

fn header_str<B>(request: &Request<B>, name: header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn cookie_names<B>(request: &Request<B>) -> Vec<String> {
    let mut names = Vec::new();
    for value in request.headers().get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            let name = pair.split('=').next().unwrap_or("").trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names
}

fn infer_view(path: &str, query: &str, policy: &DescriptorPolicy) -> ViewKind {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if policy.search_paths.iter().any(|p| path == p)
        || pairs
            .iter()
            .any(|(k, v)| policy.search_params.contains(k) && !v.is_empty())
    {
        return ViewKind::Search;
    }

    let page = pairs
        .iter()
        .find(|(k, _)| k == &policy.page_param)
        .and_then(|(_, v)| v.parse::<u32>().ok())
        .or_else(|| page_from_path(path));

    match page {
        Some(page) if page > 1 => ViewKind::PagedListing { page },
        _ => ViewKind::Plain,
    }
}

/// Recognizes `/page/<n>` path pagination alongside the query parameter.
fn page_from_path(path: &str) -> Option<u32> {
    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    while let Some(segment) = segments.next() {
        if segment == "page"
            && let Some(next) = segments.peek()
            && let Ok(page) = next.parse::<u32>()
        {
            return Some(page);
        }
    }
    None
}
