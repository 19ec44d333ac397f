//! Admission-control middleware backed by the sliding-window limiter.
//!
//! # Response Headers
//!
//! Every limited response carries:
//! - `X-RateLimit-Limit`: configured requests per window
//! - `X-RateLimit-Remaining`: requests left after this decision
//! - `X-RateLimit-Reset`: epoch seconds of `now + window`
//!
//! On rejection (429) the response additionally carries `Retry-After: 60`
//! and the body `{"error": {"code": "RATE_LIMIT_EXCEEDED", "message": ...}}`.
//!
//! # Exemptions
//!
//! Bypass paths (exact match on the URI path, e.g. `/health`) and protocol
//! upgrade requests (`Upgrade: websocket`) are never counted nor annotated.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use chrono::Utc;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::extract_client_identity;
use crate::error::ErrorBody;
use crate::ratelimit::{Admission, SlidingWindowLimiter};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Fixed retry hint sent with every rejection, in seconds.
pub const RETRY_AFTER_SECS: u64 = 60;

/// Error code in the body of a rejected request.
pub const RATE_LIMIT_EXCEEDED_CODE: &str = "RATE_LIMIT_EXCEEDED";

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(SlidingWindowLimiter::per_minute(60)?);
/// let app = Router::new()
///     .route("/metadata", get(handler))
///     .layer(RateLimitLayer::new(limiter, ["/health".to_string()]));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowLimiter>,
    bypass_paths: Arc<HashSet<String>>,
}

impl RateLimitLayer {
    /// Wrap a shared limiter. The limiter stays reachable by the caller for
    /// telemetry and periodic sweeping.
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        bypass_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            limiter,
            bypass_paths: Arc::new(bypass_paths.into_iter().collect()),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            bypass_paths: self.bypass_paths.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<SlidingWindowLimiter>,
    bypass_paths: Arc<HashSet<String>>,
}

impl<S> RateLimitService<S> {
    fn is_exempt<B>(&self, req: &Request<B>) -> bool {
        self.bypass_paths.contains(req.uri().path()) || is_upgrade_request(req)
    }
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if self.is_exempt(&req) {
            return Box::pin(inner.call(req));
        }

        let (identity, source) = extract_client_identity(&req);
        let admission = self.limiter.admit(&identity, Utc::now());

        if !admission.allowed {
            warn!(
                client_ip = %identity,
                source = ?source,
                path = %req.uri().path(),
                retry_after_secs = RETRY_AFTER_SECS,
                "Rate limit exceeded"
            );
            return Box::pin(async move { Ok(rejection_response(&admission)) });
        }

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            apply_quota_headers(response.headers_mut(), &admission);
            Ok(response)
        })
    }
}

/// Whether the request asks for a protocol upgrade (e.g. WebSocket).
pub(crate) fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Attach `X-RateLimit-*` headers describing `admission`.
pub fn apply_quota_headers(headers: &mut HeaderMap, admission: &Admission) {
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(admission.limit));
    headers.insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(admission.remaining),
    );
    headers.insert(
        RATE_LIMIT_RESET_HEADER,
        HeaderValue::from(admission.reset_epoch_secs()),
    );
}

/// Build the 429 response for a denied admission.
pub fn rejection_response(admission: &Admission) -> Response<Body> {
    let body = ErrorBody::new(
        RATE_LIMIT_EXCEEDED_CODE,
        "Too many requests, please try again later",
    );
    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();

    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    apply_quota_headers(headers, admission);

    response
}
