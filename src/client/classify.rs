//! Maps remote outcomes into [`EampError`].

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::transport::{TransportFailure, TransportResponse};
use crate::error::{EampError, ErrorBody};

/// Code used when a well-formed remote error body carries no code.
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN";

/// Classify a non-success response. Returns `None` for 2xx.
///
/// Precedence: 404, 401, 403, 429, >= 500, then any other failure status
/// is an upstream error when the body parses as `{"error": {...}}` and a
/// network error otherwise.
pub fn classify_status(response: &TransportResponse, resource_id: Option<&str>) -> Option<EampError> {
    if response.is_success() {
        return None;
    }

    let err = match response.status {
        404 => EampError::NotFound(resource_id.unwrap_or(super::METADATA_PATH).to_string()),
        401 => EampError::Authentication("Authentication required".to_string()),
        403 => EampError::Authorization("Access denied".to_string()),
        429 => EampError::RateLimited {
            message: "Rate limit exceeded".to_string(),
            retry_after: response.retry_after,
        },
        status if status >= 500 => EampError::Server {
            message: format!("Server error: {status}"),
            status,
        },
        status => match serde_json::from_slice::<ErrorBody>(&response.body) {
            Ok(body) => EampError::Upstream {
                code: body
                    .error
                    .code
                    .unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string()),
                message: body.error.message,
            },
            Err(_) => EampError::Network(format!("HTTP {status}: {}", response.text())),
        },
    };

    Some(err)
}

/// Classify a failure that produced no response.
pub fn classify_failure(failure: TransportFailure, transport: &str, timeout: Duration) -> EampError {
    match failure {
        TransportFailure::Timeout => EampError::Timeout { timeout },
        TransportFailure::Connect(message) => EampError::Network(message),
        TransportFailure::Configuration(message) => EampError::Configuration(message),
        TransportFailure::Other(message) => EampError::Transport {
            message,
            transport: transport.to_string(),
        },
    }
}

/// Parse a success body; malformed payloads are validation errors.
pub fn parse_body<T: DeserializeOwned>(response: &TransportResponse) -> Result<T, EampError> {
    serde_json::from_slice(&response.body)
        .map_err(|e| EampError::validation(format!("Invalid metadata format: {e}")))
}
