use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "macp_page_cache_hit_total",
            Unit::Count,
            "Total number of page-cache hits, labeled by tier."
        );
        describe_counter!(
            "macp_page_cache_miss_total",
            Unit::Count,
            "Total number of page-cache misses, including rejected captures."
        );
        describe_counter!(
            "macp_page_cache_commit_total",
            Unit::Count,
            "Total number of pages committed to the cache."
        );
        describe_gauge!(
            "macp_cache_event_queue_len",
            Unit::Count,
            "Current number of pending invalidation events in the queue."
        );
        describe_histogram!(
            "macp_cache_consume_ms",
            Unit::Milliseconds,
            "Invalidation consumption latency in milliseconds."
        );
        describe_counter!(
            "macp_purge_request_total",
            Unit::Count,
            "Total number of per-target purge requests, labeled by outcome."
        );
        describe_histogram!(
            "macp_purge_dispatch_ms",
            Unit::Milliseconds,
            "Purge fan-out latency across all targets in milliseconds."
        );
    });
}
