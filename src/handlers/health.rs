//! Health and statistics endpoints.
//!
//! - `GET /health` - Liveness with version and uptime
//! - `GET /stats` - Store, cache and admission-control telemetry

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, RateLimitStats, StatsResponse};
use crate::state::AppState;

/// Health check endpoint. Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Statistics endpoint.
///
/// `rate_limit` is `null` when admission control is disabled.
#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let rate_limit = state.limiter.as_ref().map(|limiter| RateLimitStats {
        limit: limiter.limit(),
        window_seconds: limiter.window().as_secs(),
        tracked_identities: limiter.tracked_identities(),
    });

    Json(StatsResponse {
        store: state.store.stats(),
        cache: state.cache.stats(),
        rate_limit,
        uptime_seconds: state.uptime_seconds(),
    })
}
