use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::{
    METRIC_CACHE_HIT, METRIC_CACHE_MISS, METRIC_CACHE_REVALIDATE, METRIC_CACHE_STALE_SERVED,
    METRIC_IDEMPOTENCY_AMBIGUOUS, METRIC_IDEMPOTENCY_DEGRADED, METRIC_IDEMPOTENCY_IN_FLIGHT,
    METRIC_IDEMPOTENCY_REPLAY, METRIC_LOCAL_SWEPT, METRIC_ORIGIN_ERROR, METRIC_TIER_ERROR,
    METRIC_TIER_SWEPT, METRIC_WARM_FAILURES, METRIC_WARM_MS,
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Cache hits, labelled by the tier that answered."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Lookups that had to call the origin loader."
        );
        describe_counter!(
            METRIC_CACHE_STALE_SERVED,
            Unit::Count,
            "Entries served past their freshness window."
        );
        describe_counter!(
            METRIC_CACHE_REVALIDATE,
            Unit::Count,
            "Background refreshes, labelled by outcome."
        );
        describe_counter!(
            METRIC_TIER_ERROR,
            Unit::Count,
            "Distributed tier calls that failed or timed out."
        );
        describe_counter!(
            METRIC_ORIGIN_ERROR,
            Unit::Count,
            "Origin loader calls that failed or timed out."
        );
        describe_counter!(
            METRIC_LOCAL_SWEPT,
            Unit::Count,
            "Expired process-local entries removed by the sweeper."
        );
        describe_counter!(
            METRIC_TIER_SWEPT,
            Unit::Count,
            "Expired entries removed from an in-process distributed tier."
        );
        describe_counter!(
            METRIC_IDEMPOTENCY_REPLAY,
            Unit::Count,
            "Duplicate writes answered with a stored response."
        );
        describe_counter!(
            METRIC_IDEMPOTENCY_IN_FLIGHT,
            Unit::Count,
            "Duplicate writes that arrived while the first attempt was running."
        );
        describe_counter!(
            METRIC_IDEMPOTENCY_AMBIGUOUS,
            Unit::Count,
            "Writes whose outcome was unknown after a timeout."
        );
        describe_counter!(
            METRIC_IDEMPOTENCY_DEGRADED,
            Unit::Count,
            "Writes executed without deduplication because the lock tier was unavailable."
        );
        describe_histogram!(
            METRIC_WARM_MS,
            Unit::Milliseconds,
            "Cache warm run latency in milliseconds."
        );
        describe_counter!(
            METRIC_WARM_FAILURES,
            Unit::Count,
            "Targets that failed to warm."
        );
    });
}
