//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (applied in order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (bypassed for /health, /metrics)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   API Key Auth   │ ← 401 if key missing or unknown (when API_KEYS set)
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          │
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/stats` - Health & monitoring
//! - `/metadata` - Metadata listing and CRUD

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, header};
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{ApiKeyAuth, RateLimitLayer};
use crate::middleware::rate_limit::{
    RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Admission control is layered only when `state.limiter` is set; the
/// layer shares that limiter so `/stats` and the maintenance task see the
/// same records.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    let cors = build_cors_layer(&config.cors_allowed_origins);

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .route("/metadata", get(handlers::list_metadata))
        .route(
            "/metadata/{id}",
            get(handlers::get_metadata)
                .put(handlers::put_metadata)
                .delete(handlers::delete_metadata),
        );

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. CORS
    router = router.layer(cors);

    // 3. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 4. Authentication - runs after admission, so rejected keys still count
    if config.auth_enabled() {
        info!(
            keys = config.api_keys.len(),
            header = %config.api_key_header,
            bypass_paths = ?config.auth_bypass_paths,
            "API key authentication enabled"
        );
        router = router.layer(ApiKeyAuth::new(
            config.api_keys.iter().cloned(),
            &config.api_key_header,
            config.auth_bypass_paths.iter().cloned(),
        ));
    } else {
        info!("API key authentication disabled (API_KEYS not set)");
    }

    // 5. Rate Limiting - applied last, runs first in the request pipeline
    if let Some(limiter) = &state.limiter {
        info!(
            limit = limiter.limit(),
            window_secs = limiter.window().as_secs(),
            bypass_paths = ?config.rate_limit_bypass_paths,
            "Rate limiting enabled"
        );
        router = router.layer(RateLimitLayer::new(
            limiter.clone(),
            config.rate_limit_bypass_paths.iter().cloned(),
        ));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_REQUESTS_PER_MINUTE=0)");
    }

    router.with_state(state)
}

/// Build CORS layer from configuration.
///
/// `*` anywhere in the list allows any origin.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    let cors = if allow_any {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    cors.allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
            HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
            HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
            header::RETRY_AFTER,
        ])
}
