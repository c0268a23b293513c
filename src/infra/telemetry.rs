use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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
///
/// Logs go to stderr; stdout carries command output.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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
            "cms_cache_hit_total",
            Unit::Count,
            "Total number of reads served from a fresh cache entry."
        );
        describe_counter!(
            "cms_cache_miss_total",
            Unit::Count,
            "Total number of reads that found no fresh cache entry."
        );
        describe_counter!(
            "cms_cache_fetch_total",
            Unit::Count,
            "Total number of remote fetches issued."
        );
        describe_counter!(
            "cms_cache_fetch_joined_total",
            Unit::Count,
            "Total number of reads that joined a fetch already in flight."
        );
        describe_counter!(
            "cms_cache_fetch_discarded_total",
            Unit::Count,
            "Total number of fetch results discarded because a later write superseded them."
        );
        describe_counter!(
            "cms_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries marked stale."
        );
        describe_counter!(
            "cms_cache_session_reset_total",
            Unit::Count,
            "Total number of session-wide cache resets."
        );
        describe_counter!(
            "cms_cache_mutation_fallback_total",
            Unit::Count,
            "Total number of writes reconciled by invalidating the whole family."
        );
        describe_histogram!(
            "cms_cache_fetch_ms",
            Unit::Milliseconds,
            "Remote fetch latency in milliseconds."
        );
    });
}
