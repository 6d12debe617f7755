//! Metric names emitted by the cache layer. Descriptions live in `infra::telemetry`.

pub const METRIC_CACHE_HIT: &str = "newsdesk_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "newsdesk_cache_miss_total";
pub const METRIC_CACHE_STALE_SERVED: &str = "newsdesk_cache_stale_served_total";
pub const METRIC_CACHE_REVALIDATE: &str = "newsdesk_cache_revalidate_total";
pub const METRIC_TIER_ERROR: &str = "newsdesk_cache_tier_error_total";
pub const METRIC_ORIGIN_ERROR: &str = "newsdesk_cache_origin_error_total";
pub const METRIC_LOCAL_SWEPT: &str = "newsdesk_cache_local_swept_total";
pub const METRIC_TIER_SWEPT: &str = "newsdesk_cache_tier_swept_total";
pub const METRIC_IDEMPOTENCY_REPLAY: &str = "newsdesk_idempotency_replay_total";
pub const METRIC_IDEMPOTENCY_IN_FLIGHT: &str = "newsdesk_idempotency_in_flight_total";
pub const METRIC_IDEMPOTENCY_AMBIGUOUS: &str = "newsdesk_idempotency_ambiguous_total";
pub const METRIC_IDEMPOTENCY_DEGRADED: &str = "newsdesk_idempotency_degraded_total";
pub const METRIC_WARM_MS: &str = "newsdesk_cache_warm_ms";
pub const METRIC_WARM_FAILURES: &str = "newsdesk_cache_warm_failures_total";
