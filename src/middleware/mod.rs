//! HTTP middleware for admission control and authentication.
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → API Key Auth → Trace → CORS → Handler → Response
//!              ↓                ↓                                     ↑
//!          429 Too Many    401 Unauthorized              X-RateLimit-* headers
//! ```
//!
//! The rate limiter resolves a client identity ([`ip`]), consults the shared
//! [`SlidingWindowLimiter`](crate::ratelimit::SlidingWindowLimiter) and either
//! rejects the request or forwards it and annotates the response with the
//! post-decision quota.

pub mod auth;
pub mod ip;
pub mod rate_limit;

pub use auth::{AUTHENTICATION_ERROR_CODE, ApiKeyAuth, DEFAULT_API_KEY_HEADER};
pub use ip::{IdentitySource, UNKNOWN_IP, extract_client_identity, extract_client_ip};
pub use rate_limit::{
    RATE_LIMIT_EXCEEDED_CODE, RETRY_AFTER_SECS, RateLimitLayer, apply_quota_headers,
    rejection_response,
};
