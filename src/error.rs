use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed error taxonomy shared by the server and the client SDK.
///
/// Every variant maps to a stable machine-readable code (see [`EampError::code`])
/// and serializes to the `{"error": {"code", "message", "field"?}}` wire shape.
///
/// # Classification
///
/// The client maps transport outcomes into exactly one variant:
///
/// - `NotFound`, `Authentication`, `Authorization`, `RateLimited`, `Server`
///   come from HTTP status codes
/// - `Upstream` carries a well-formed remote error body for any other failure
/// - `Timeout` and `Network` are decided independently of the status code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EampError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    Authorization(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Server error {status}: {message}")]
    Server { message: String, status: u16 },

    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Transport error ({transport}): {message}")]
    Transport { message: String, transport: String },

    #[error("Upstream error [{code}]: {message}")]
    Upstream { code: String, message: String },
}

impl EampError {
    /// Validation error without a field reference.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Validation error pointing at a specific input field.
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &str {
        match self {
            EampError::NotFound(_) => "RESOURCE_NOT_FOUND",
            EampError::Validation { .. } => "VALIDATION_ERROR",
            EampError::Network(_) => "NETWORK_ERROR",
            EampError::Authentication(_) => "AUTHENTICATION_ERROR",
            EampError::Authorization(_) => "AUTHORIZATION_ERROR",
            EampError::RateLimited { .. } => "RATE_LIMIT_ERROR",
            EampError::Server { .. } => "SERVER_ERROR",
            EampError::Timeout { .. } => "TIMEOUT_ERROR",
            EampError::Configuration(_) => "CONFIGURATION_ERROR",
            EampError::Cache(_) => "CACHE_ERROR",
            EampError::Transport { .. } => "TRANSPORT_ERROR",
            EampError::Upstream { code, .. } => code.as_str(),
        }
    }

    /// Retry-after hint in seconds, only present for rate-limited errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            EampError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Field reference, only present for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            EampError::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            EampError::NotFound(_) => StatusCode::NOT_FOUND,
            EampError::Validation { .. } => StatusCode::BAD_REQUEST,
            EampError::Authentication(_) => StatusCode::UNAUTHORIZED,
            EampError::Authorization(_) => StatusCode::FORBIDDEN,
            EampError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EampError::Server { .. } | EampError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            EampError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EampError::Network(_) | EampError::Transport { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EampError::Configuration(_) | EampError::Cache(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to expose to remote callers.
    ///
    /// Configuration and cache failures are internal invariants and are
    /// replaced with a generic message.
    fn public_message(&self) -> String {
        match self {
            EampError::Configuration(_) => {
                "Service configuration error. Please contact support.".to_string()
            }
            EampError::Cache(_) => "An internal error occurred.".to_string(),
            EampError::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Wire representation of this error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: Some(self.code().to_string()),
                message: self.public_message(),
                field: self.field().map(str::to_string),
            },
        }
    }
}

/// `{"error": {...}}` envelope used for every error surfaced over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail of [`ErrorBody`].
///
/// `code` is optional on the way in so that remote bodies lacking a code
/// still parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: Some(code.into()),
                message: message.into(),
                field: None,
            },
        }
    }
}

impl IntoResponse for EampError {
    fn into_response(self) -> Response {
        // Full detail stays in the server log
        tracing::error!(error = %self, code = self.code(), "Request failed");

        let status = self.status();
        let retry_after = self.retry_after();
        let mut response = (status, axum::Json(self.to_body())).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Convenience type alias for Results with EampError.
pub type EampResult<T> = Result<T, EampError>;
