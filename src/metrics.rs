//! Prometheus metrics for admission control, caching, and client fetches.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `eamp_admissions_total` - Admission decisions (labels: decision)
//! - `eamp_cache_lookups_total` - Cache lookups (labels: cache, result)
//! - `eamp_cache_evictions_total` - Expired entries removed (labels: cache)
//! - `eamp_client_fetches_total` - Client fetch outcomes (labels: outcome)
//! - `eamp_callback_failures_total` - Subscriber callbacks that returned an error
//!
//! ## Histograms
//! - `eamp_client_fetch_duration_seconds` - Remote fetch duration
//!
//! ## Gauges
//! - `eamp_rate_limit_tracked_identities` - Identities with a live rate window
//!
//! Recording functions are no-ops until [`init_metrics`] installs an exporter,
//! so library users and tests can call them freely.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const ADMISSIONS_TOTAL: &str = "eamp_admissions_total";
    pub const CACHE_LOOKUPS_TOTAL: &str = "eamp_cache_lookups_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "eamp_cache_evictions_total";
    pub const CLIENT_FETCHES_TOTAL: &str = "eamp_client_fetches_total";
    pub const CALLBACK_FAILURES_TOTAL: &str = "eamp_callback_failures_total";
    pub const CLIENT_FETCH_DURATION_SECONDS: &str = "eamp_client_fetch_duration_seconds";
    pub const RATE_LIMIT_TRACKED_IDENTITIES: &str = "eamp_rate_limit_tracked_identities";
}

/// Install the Prometheus exporter and describe all metrics.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::ADMISSIONS_TOTAL, "Rate limiter admission decisions");
    describe_counter!(names::CACHE_LOOKUPS_TOTAL, "TTL cache lookups by result");
    describe_counter!(
        names::CACHE_EVICTIONS_TOTAL,
        "Expired cache entries removed on read or cleanup"
    );
    describe_counter!(
        names::CLIENT_FETCHES_TOTAL,
        "Client metadata fetches by outcome code"
    );
    describe_counter!(
        names::CALLBACK_FAILURES_TOTAL,
        "Subscription callbacks that failed during dispatch"
    );
    describe_histogram!(
        names::CLIENT_FETCH_DURATION_SECONDS,
        "Remote metadata fetch duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_IDENTITIES,
        "Client identities with a non-empty rate window"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_admission(allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    counter!(names::ADMISSIONS_TOTAL, "decision" => decision).increment(1);
}

pub fn record_cache_lookup(cache: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(names::CACHE_LOOKUPS_TOTAL, "cache" => cache, "result" => result).increment(1);
}

pub fn record_cache_evictions(cache: &'static str, count: u64) {
    counter!(names::CACHE_EVICTIONS_TOTAL, "cache" => cache).increment(count);
}

/// Record a client fetch outcome; `outcome` is `"ok"`, `"cached"` or an error code.
pub fn record_client_fetch(outcome: &str) {
    counter!(names::CLIENT_FETCHES_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

pub fn record_fetch_duration(duration_secs: f64) {
    histogram!(names::CLIENT_FETCH_DURATION_SECONDS).record(duration_secs);
}

pub fn record_callback_failure() {
    counter!(names::CALLBACK_FAILURES_TOTAL).increment(1);
}

pub fn set_tracked_identities(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_IDENTITIES).set(count as f64);
}
