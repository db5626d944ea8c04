//! Client address extraction for structured logging (SPEC_FULL §11 item 1).
//!
//! Grounded on `original_source/http/request.go`'s `clientIP`: prefer
//! `X-Real-Ip`, then the first entry of `X-Forwarded-For`, then the peer's
//! connection address, in that order. The peer address reaches this
//! function via [`axum::extract::connect_info::ConnectInfo`], stashed onto
//! the request's extensions by `SwappableRouter` from the accepting
//! connection's remote address (see `router.rs`).

use std::net::SocketAddr;

use axum::http::HeaderMap;

#[must_use]
pub fn client_ip(headers: &HeaderMap, peer_addr: Option<SocketAddr>) -> String {
    if let Some(value) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return value.to_owned();
    }

    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = value.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_owned();
        }
    }

    peer_addr.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn prefers_real_ip() {
        let h = headers(&[("x-real-ip", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")]);
        assert_eq!(client_ip(&h, None), "1.1.1.1");
    }

    #[test]
    fn falls_back_to_first_forwarded_for_entry() {
        let h = headers(&[("x-forwarded-for", "2.2.2.2, 3.3.3.3")]);
        assert_eq!(client_ip(&h, None), "2.2.2.2");
    }

    #[test]
    fn falls_back_to_peer_addr_when_no_headers_present() {
        let peer: SocketAddr = "9.9.9.9:1234".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "9.9.9.9");
    }

    #[test]
    fn empty_when_nothing_available() {
        assert_eq!(client_ip(&HeaderMap::new(), None), "");
    }
}
