//! Client identity extraction for admission control.
//!
//! # Preference Order
//!
//! 1. `X-Forwarded-For` - first entry of the comma-separated list
//! 2. `X-Real-IP`
//! 3. Transport peer address (`ConnectInfo<SocketAddr>` extension)
//! 4. The literal [`UNKNOWN_IP`] bucket
//!
//! # Security Warning: IP Spoofing Risk
//!
//! The header sources are client-controlled. Deploy behind a reverse proxy
//! that overwrites `X-Forwarded-For`/`X-Real-IP`, otherwise a client can
//! rotate identities to escape its quota or exhaust someone else's.
//!
//! ## The "unknown" Fallback
//!
//! Requests carrying no identifying information at all share a single
//! bucket and are rate-limited together.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Identity shared by every request that cannot be attributed to a client.
pub const UNKNOWN_IP: &str = "unknown";

/// Where an identity was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    ForwardedFor,
    RealIp,
    Peer,
    Unknown,
}

#[inline]
fn header_identity<B>(req: &Request<B>) -> Option<(&str, IdentitySource)> {
    // Format: "client, proxy1, proxy2" - the first entry is the client
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
    {
        let first_ip = first_ip.trim();
        if !first_ip.is_empty() {
            return Some((first_ip, IdentitySource::ForwardedFor));
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        let value = value.trim();
        if !value.is_empty() {
            return Some((value, IdentitySource::RealIp));
        }
    }

    None
}

/// Extract the rate-limit identity of a request along with its source.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` when nothing identifies the client,
/// avoiding an allocation on the shared-bucket path.
pub fn extract_client_identity<B>(req: &Request<B>) -> (Cow<'static, str>, IdentitySource) {
    if let Some((ip, source)) = header_identity(req) {
        return (Cow::Owned(ip.to_string()), source);
    }

    if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return (Cow::Owned(peer.ip().to_string()), IdentitySource::Peer);
    }

    (Cow::Borrowed(UNKNOWN_IP), IdentitySource::Unknown)
}

/// Extract the rate-limit identity of a request.
#[inline]
pub fn extract_client_ip<B>(req: &Request<B>) -> Cow<'static, str> {
    extract_client_identity(req).0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn with_peer(mut req: Request<Body>, addr: &str) -> Request<Body> {
        let peer: SocketAddr = addr.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        req
    }

    #[test]
    fn test_forwarded_for_first_entry() {
        let req = Request::builder()
            .header("x-forwarded-for", "  192.168.1.1  , 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            extract_client_identity(&req),
            (
                Cow::Borrowed("192.168.1.1"),
                IdentitySource::ForwardedFor
            )
        );
    }

    #[test]
    fn test_forwarded_for_wins_over_real_ip_and_peer() {
        let req = Request::builder()
            .header("x-forwarded-for", "10.0.0.1")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();
        let req = with_peer(req, "127.0.0.1:5000");

        assert_eq!(extract_client_ip(&req), "10.0.0.1");
    }

    #[test]
    fn test_real_ip_used_without_forwarded_for() {
        let req = Request::builder()
            .header("x-real-ip", "::1")
            .body(Body::empty())
            .unwrap();

        let (ip, source) = extract_client_identity(&req);
        assert_eq!(ip, "::1");
        assert_eq!(source, IdentitySource::RealIp);
    }

    #[test]
    fn test_peer_address_fallback() {
        let req = with_peer(
            Request::builder().body(Body::empty()).unwrap(),
            "203.0.113.7:41000",
        );

        let (ip, source) = extract_client_identity(&req);
        assert_eq!(ip, "203.0.113.7");
        assert_eq!(source, IdentitySource::Peer);
    }

    #[test]
    fn test_empty_forwarded_for_falls_through() {
        let req = Request::builder()
            .header("x-forwarded-for", "   ")
            .header("x-real-ip", "192.168.1.9")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&req), "192.168.1.9");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let (ip, source) = extract_client_identity(&req);
        assert_eq!(ip, UNKNOWN_IP);
        assert_eq!(source, IdentitySource::Unknown);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_long_proxy_chain() {
        let long_chain = (0..100)
            .map(|i| format!("10.0.0.{}", i % 256))
            .collect::<Vec<_>>()
            .join(", ");
        let req = Request::builder()
            .header("x-forwarded-for", &long_chain)
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_client_ip(&req), "10.0.0.0");
    }
}
