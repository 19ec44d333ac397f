//! Fuzz resource-id validation and client identity extraction.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```
//!
//! Neither function may panic, and an identity is never empty.

#![no_main]

use axum::body::Body;
use axum::http::Request;
use eamp_gateway::middleware::extract_client_identity;
use eamp_gateway::validation::{MAX_RESOURCE_ID_LENGTH, validate_resource_id};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data)
        && validate_resource_id(s).is_ok()
    {
        assert!(!s.is_empty() && s.len() <= MAX_RESOURCE_ID_LENGTH);
        assert!(!s.chars().any(char::is_control));
    }

    // Split the input between the two proxy headers
    let mid = data.len() / 2;
    let (forwarded, real_ip) = data.split_at(mid);

    let mut builder = Request::builder();
    if let Ok(value) = axum::http::HeaderValue::from_bytes(forwarded) {
        builder = builder.header("x-forwarded-for", value);
    }
    if let Ok(value) = axum::http::HeaderValue::from_bytes(real_ip) {
        builder = builder.header("x-real-ip", value);
    }

    if let Ok(req) = builder.body(Body::empty()) {
        let (identity, _) = extract_client_identity(&req);
        assert!(!identity.is_empty());
    }
});
