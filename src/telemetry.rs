//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status`: refresh outcome: "ok" or "error"

/// Reads answered from a fresh store entry.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Reads that found no fresh entry (missing or stale).
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Reads answered with a stale value while a refresh was launched.
pub const STALE_SERVED_TOTAL: &str = "huginn_stale_served_total";

/// Completed background refreshes.
///
/// Labels: `status` ("ok" | "error").
pub const REFRESHES_TOTAL: &str = "huginn_refreshes_total";

/// Background refresh duration in seconds, measured around the loader call.
pub const REFRESH_DURATION_SECONDS: &str = "huginn_refresh_duration_seconds";

/// Status entries removed by the sweep.
pub const SWEEP_EVICTIONS_TOTAL: &str = "huginn_sweep_evictions_total";

/// In-progress entries that outlived their deadline.
pub const STALLED_REFRESHES_TOTAL: &str = "huginn_stalled_refreshes_total";
