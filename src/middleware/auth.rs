//! API key authentication middleware.
//!
//! # Behavior
//!
//! - No keys configured: every request passes (authentication disabled)
//! - Public paths (exact match, e.g. `/health`) and WebSocket upgrades pass
//! - Otherwise the configured header (default `X-API-Key`) must carry one of
//!   the configured keys, or the request is rejected with 401 and
//!   `{"error": {"code": "AUTHENTICATION_ERROR", "message": ...}}`
//!
//! Keys are compared in constant time, and every configured key is checked
//! so the response time does not reveal which one matched.
//!
//! ```bash
//! API_KEYS=key-one,key-two cargo run
//! curl -H "X-API-Key: key-one" http://localhost:8000/metadata
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use subtle::{Choice, ConstantTimeEq};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::extract_client_ip;
use super::rate_limit::is_upgrade_request;
use crate::error::ErrorBody;

/// Default header carrying the API key.
pub const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Error code in the body of a rejected request.
pub const AUTHENTICATION_ERROR_CODE: &str = "AUTHENTICATION_ERROR";

/// API key authentication layer.
#[derive(Clone)]
pub struct ApiKeyAuth {
    keys: Arc<Vec<String>>,
    header: Arc<str>,
    public_paths: Arc<HashSet<String>>,
}

impl ApiKeyAuth {
    /// `header` is matched case-insensitively. An empty `keys` disables
    /// authentication.
    pub fn new(
        keys: impl IntoIterator<Item = String>,
        header: &str,
        public_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            keys: Arc::new(keys.into_iter().filter(|k| !k.is_empty()).collect()),
            header: Arc::from(header.to_ascii_lowercase()),
            public_paths: Arc::new(public_paths.into_iter().collect()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl<S> Layer<S> for ApiKeyAuth {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            auth: self.clone(),
        }
    }
}

/// API key authentication service wrapper.
#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    auth: ApiKeyAuth,
}

impl<S> Service<Request<Body>> for ApiKeyAuthService<S>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if !self.auth.is_enabled()
            || self.auth.public_paths.contains(req.uri().path())
            || is_upgrade_request(&req)
        {
            return Box::pin(inner.call(req));
        }

        let provided = req
            .headers()
            .get(&*self.auth.header)
            .and_then(|v| v.to_str().ok());

        match provided {
            Some(key) if matches_any(key, &self.auth.keys) => {
                debug!("API key authentication successful");
                Box::pin(inner.call(req))
            }
            Some(_) => {
                warn!(
                    path = %req.uri().path(),
                    client_ip = %extract_client_ip(&req),
                    "Invalid API key provided"
                );
                Box::pin(async { Ok(unauthorized_response()) })
            }
            None => {
                warn!(
                    path = %req.uri().path(),
                    client_ip = %extract_client_ip(&req),
                    "Missing API key"
                );
                Box::pin(async { Ok(unauthorized_response()) })
            }
        }
    }
}

/// Constant-time membership test over every key.
fn matches_any(provided: &str, keys: &[String]) -> bool {
    keys.iter()
        .fold(Choice::from(0), |found, key| {
            found | provided.as_bytes().ct_eq(key.as_bytes())
        })
        .into()
}

/// Build the 401 response for a missing or unknown key.
pub fn unauthorized_response() -> Response<Body> {
    let body = ErrorBody::new(AUTHENTICATION_ERROR_CODE, "Valid API key required");
    let mut response = (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("API-Key"));
    response
}
