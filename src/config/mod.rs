//! Configuration layer: typed settings with layered precedence (file → env).

use std::{num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::ExclusionRules;
use crate::varnish::PurgeTarget;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "macp";
const ENV_PREFIX: &str = "MACP";

const DEFAULT_MIN_BODY_BYTES: usize = 255;
const DEFAULT_TTL_SECONDS: u64 = 604_800;
const DEFAULT_NAMESPACE: &str = "page:";
const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_CACHE_ROOT: &str = "cache/macp";
const DEFAULT_VARNISH_PORT: u16 = 6081;
const DEFAULT_PURGE_METHOD: &str = "PURGE";
const DEFAULT_PURGE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_CACHE_TAG_PREFIX: &str = "96aa";
const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
const DEFAULT_BACKEND_PORT: u16 = 8080;
const DEFAULT_ADMIN_PATH_PREFIX: &str = "/admin";
const DEFAULT_PAGE_PARAM: &str = "page";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub disk: DiskSettings,
    pub shared: SharedSettings,
    pub varnish: VarnishSettings,
    pub exclusions: ExclusionRules,
    pub request: RequestSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub min_body_bytes: usize,
    pub ttl_seconds: NonZeroU64,
    pub gzip: bool,
    pub namespace: String,
    pub content_type: String,
    pub auto_consume_interval_ms: NonZeroU64,
    pub consume_batch_limit: usize,
}

#[derive(Debug, Clone)]
pub struct DiskSettings {
    /// Cache root directory; one file per key, plus the placeholder.
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SharedSettings {
    /// Redis connection URL; `None` runs the store disk-only.
    pub url: Option<String>,
}

/// Edge-proxy settings: purge client parameters plus everything the VCL
/// generator renders. The exclusion lists here are independent from the
/// page-cache [`ExclusionRules`] and only affect the generated VCL.
#[derive(Debug, Clone)]
pub struct VarnishSettings {
    pub enabled: bool,
    pub targets: Vec<PurgeTarget>,
    pub purge_method: String,
    pub timeout: Duration,
    pub cache_tag_prefix: String,
    /// Origin host carried in `Host` and `X-MACP-Host` purge headers.
    pub host: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub purge_acl: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub excluded_params: Vec<String>,
}

impl Default for VarnishSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            targets: vec![PurgeTarget {
                host: "127.0.0.1".to_string(),
                port: DEFAULT_VARNISH_PORT,
            }],
            purge_method: DEFAULT_PURGE_METHOD.to_string(),
            timeout: Duration::from_millis(DEFAULT_PURGE_TIMEOUT_MS),
            cache_tag_prefix: DEFAULT_CACHE_TAG_PREFIX.to_string(),
            host: "localhost".to_string(),
            backend_host: DEFAULT_BACKEND_HOST.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
            purge_acl: ["localhost", "127.0.0.1"].map(str::to_string).to_vec(),
            excluded_paths: ["^/account/", "/cart/", "/checkout/", "/login"]
                .map(str::to_string)
                .to_vec(),
            excluded_params: ["__SID", "noCache"].map(str::to_string).to_vec(),
        }
    }
}

/// Rules for turning raw requests into descriptors.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    /// Cookie name prefixes that mark an authenticated session.
    pub session_cookies: Vec<String>,
    /// Path prefix of the control panel.
    pub admin_path_prefix: String,
    /// Paths serving search results.
    pub search_paths: Vec<String>,
    /// Query parameters carrying a search term.
    pub search_params: Vec<String>,
    /// Query parameter carrying the listing page number.
    pub page_param: String,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            session_cookies: ["session", "logged_in"].map(str::to_string).to_vec(),
            admin_path_prefix: DEFAULT_ADMIN_PATH_PREFIX.to_string(),
            search_paths: vec!["/search".to_string()],
            search_params: ["s", "q"].map(str::to_string).to_vec(),
            page_param: DEFAULT_PAGE_PARAM.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
pub fn load() -> Result<Settings, LoadError> {
    let builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

/// Load settings from an explicit file, with the environment layered on
/// top.
pub fn load_from(path: &std::path::Path) -> Result<Settings, LoadError> {
    let builder = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    disk: RawDiskSettings,
    shared: RawSharedSettings,
    varnish: RawVarnishSettings,
    exclusions: RawExclusionSettings,
    request: RawRequestSettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            disk,
            shared,
            varnish,
            exclusions,
            request,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            disk: build_disk_settings(disk)?,
            shared: build_shared_settings(shared),
            varnish: build_varnish_settings(varnish)?,
            exclusions: build_exclusion_rules(exclusions),
            request: build_request_settings(request),
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = non_zero_u64(
        cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
        "cache.ttl_seconds",
    )?;
    let auto_consume_interval_ms = non_zero_u64(
        cache
            .auto_consume_interval_ms
            .unwrap_or(DEFAULT_AUTO_CONSUME_INTERVAL_MS),
        "cache.auto_consume_interval_ms",
    )?;
    let consume_batch_limit = cache
        .consume_batch_limit
        .unwrap_or(DEFAULT_CONSUME_BATCH_LIMIT);
    if consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.consume_batch_limit",
            "must be greater than zero",
        ));
    }

    let namespace = cache
        .namespace
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    if namespace.is_empty() {
        return Err(LoadError::invalid(
            "cache.namespace",
            "namespace must not be empty",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        min_body_bytes: cache.min_body_bytes.unwrap_or(DEFAULT_MIN_BODY_BYTES),
        ttl_seconds,
        gzip: cache.gzip.unwrap_or(true),
        namespace,
        content_type: cache
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        auto_consume_interval_ms,
        consume_batch_limit,
    })
}

fn build_disk_settings(disk: RawDiskSettings) -> Result<DiskSettings, LoadError> {
    let root = disk
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("disk.root", "path must not be empty"));
    }
    Ok(DiskSettings { root })
}

fn build_shared_settings(shared: RawSharedSettings) -> SharedSettings {
    let url = shared.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    SharedSettings { url }
}

fn build_varnish_settings(varnish: RawVarnishSettings) -> Result<VarnishSettings, LoadError> {
    let defaults = VarnishSettings::default();
    let enabled = varnish.enabled.unwrap_or(false);

    let port = varnish.port.unwrap_or(DEFAULT_VARNISH_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "varnish.port",
            "port must be greater than zero",
        ));
    }
    let servers = varnish
        .servers
        .unwrap_or_else(|| vec!["127.0.0.1".to_string()]);
    let targets: Vec<PurgeTarget> = servers
        .into_iter()
        .map(|host| PurgeTarget { host, port })
        .collect();
    if enabled && targets.is_empty() {
        return Err(LoadError::invalid(
            "varnish.servers",
            "at least one server is required when varnish is enabled",
        ));
    }

    let host = varnish.host.unwrap_or(defaults.host);
    if enabled && host.is_empty() {
        return Err(LoadError::invalid(
            "varnish.host",
            "origin host is required when varnish is enabled",
        ));
    }

    let timeout_ms = varnish.timeout_ms.unwrap_or(DEFAULT_PURGE_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "varnish.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(VarnishSettings {
        enabled,
        targets,
        purge_method: varnish.purge_method.unwrap_or(defaults.purge_method),
        timeout: Duration::from_millis(timeout_ms),
        cache_tag_prefix: varnish
            .cache_tag_prefix
            .unwrap_or(defaults.cache_tag_prefix),
        host,
        backend_host: varnish.backend_host.unwrap_or(defaults.backend_host),
        backend_port: varnish.backend_port.unwrap_or(defaults.backend_port),
        purge_acl: varnish.purge_acl.unwrap_or(defaults.purge_acl),
        excluded_paths: varnish.excluded_paths.unwrap_or(defaults.excluded_paths),
        excluded_params: varnish.excluded_params.unwrap_or(defaults.excluded_params),
    })
}

fn build_exclusion_rules(exclusions: RawExclusionSettings) -> ExclusionRules {
    let defaults = ExclusionRules::default();
    ExclusionRules {
        paths: exclusions.paths.unwrap_or(defaults.paths),
        query_params: exclusions.query_params.unwrap_or(defaults.query_params),
        path_patterns: exclusions.path_patterns.unwrap_or(defaults.path_patterns),
    }
}

fn build_request_settings(request: RawRequestSettings) -> RequestSettings {
    let defaults = RequestSettings::default();
    RequestSettings {
        session_cookies: request.session_cookies.unwrap_or(defaults.session_cookies),
        admin_path_prefix: request
            .admin_path_prefix
            .unwrap_or(defaults.admin_path_prefix),
        search_paths: request.search_paths.unwrap_or(defaults.search_paths),
        search_params: request.search_params.unwrap_or(defaults.search_params),
        page_param: request.page_param.unwrap_or(defaults.page_param),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    min_body_bytes: Option<usize>,
    ttl_seconds: Option<u64>,
    gzip: Option<bool>,
    namespace: Option<String>,
    content_type: Option<String>,
    auto_consume_interval_ms: Option<u64>,
    consume_batch_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDiskSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSharedSettings {
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVarnishSettings {
    enabled: Option<bool>,
    servers: Option<Vec<String>>,
    port: Option<u16>,
    purge_method: Option<String>,
    timeout_ms: Option<u64>,
    cache_tag_prefix: Option<String>,
    host: Option<String>,
    backend_host: Option<String>,
    backend_port: Option<u16>,
    purge_acl: Option<Vec<String>>,
    excluded_paths: Option<Vec<String>>,
    excluded_params: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExclusionSettings {
    paths: Option<Vec<String>>,
    query_params: Option<Vec<String>>,
    path_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRequestSettings {
    session_cookies: Option<Vec<String>>,
    admin_path_prefix: Option<String>,
    search_paths: Option<Vec<String>>,
    search_params: Option<Vec<String>>,
    page_param: Option<String>,
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.min_body_bytes, 255);
        assert_eq!(settings.cache.ttl_seconds.get(), 604_800);
        assert_eq!(settings.disk.root, PathBuf::from("cache/macp"));
        assert!(settings.shared.url.is_none());
        assert!(!settings.varnish.enabled);
        assert_eq!(settings.varnish.purge_method, "PURGE");
        assert_eq!(settings.varnish.timeout, Duration::from_millis(2000));
        assert!(matches!(settings.logging.format, LogFormat::Compact));
        assert_eq!(settings.logging.level, LevelFilter::INFO);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.ttl_seconds = Some(0);
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "cache.ttl_seconds",
                ..
            })
        ));
    }

    #[test]
    fn varnish_enabled_requires_servers() {
        let mut raw = RawSettings::default();
        raw.varnish.enabled = Some(true);
        raw.varnish.servers = Some(Vec::new());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "varnish.servers",
                ..
            })
        ));
    }

    #[test]
    fn varnish_servers_share_the_configured_port() {
        let mut raw = RawSettings::default();
        raw.varnish.enabled = Some(true);
        raw.varnish.host = Some("example.com".to_string());
        raw.varnish.servers = Some(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        raw.varnish.port = Some(6082);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.varnish.targets.len(), 2);
        assert!(
            settings
                .varnish
                .targets
                .iter()
                .all(|target| target.port == 6082)
        );
    }

    #[test]
    fn blank_shared_url_reads_as_absent() {
        let mut raw = RawSettings::default();
        raw.shared.url = Some("   ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.shared.url.is_none());
    }

    #[test]
    fn exclusion_defaults_cover_commerce_and_auth_paths() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        for expected in ["/cart/", "/checkout/", "/login"] {
            assert!(
                settings
                    .exclusions
                    .paths
                    .iter()
                    .any(|path| path == expected),
                "missing default exclusion {expected}"
            );
        }
        // the varnish-side list is configured independently
        assert!(
            settings
                .varnish
                .excluded_paths
                .contains(&"^/account/".to_string())
        );
    }

    #[test]
    fn json_logging_can_be_enabled() {
        let mut raw = RawSettings::default();
        raw.logging.json = Some(true);
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("chatty".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "logging.level",
                ..
            })
        ));
    }
}
