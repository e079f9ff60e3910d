//! Header handling between callers and backends.
//!
//! Backends trust the identity headers the gateway injects, so inbound
//! copies are always removed before forwarding. Hop-by-hop headers are
//! connection-scoped and never cross the proxy in either direction.

use std::net::{IpAddr, SocketAddr};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use threshold_core::{CorrelationId, Identity, CORRELATION_ID_HEADER};

/// Subject id of the authenticated caller.
pub static HEADER_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// Role of the authenticated caller.
pub static HEADER_USER_ROLE: HeaderName = HeaderName::from_static("x-user-role");

/// Email of the authenticated caller.
pub static HEADER_USER_EMAIL: HeaderName = HeaderName::from_static("x-user-email");

/// Client address chain.
pub static HEADER_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Single client address set by some load balancers.
pub static HEADER_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Socket address of the connection a request arrived on.
///
/// Inserted into request extensions by the server; this is the hop appended
/// to `x-forwarded-for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Headers scoped to one connection (RFC 9110 §7.6.1).
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers only the gateway may set toward backends.
pub static TRUST_HEADERS: &[&str] = &[
    "x-user-id",
    "x-user-role",
    "x-user-email",
    CORRELATION_ID_HEADER,
];

/// Returns `true` for hop-by-hop headers, including any the `Connection`
/// header names.
pub fn is_hop_by_hop(name: &HeaderName, headers: &HeaderMap) -> bool {
    if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
        return true;
    }
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(name.as_str()))
}

/// Copies inbound headers that may be forwarded.
///
/// Drops hop-by-hop headers, `host` and `content-length` (the client sets
/// both for the outbound call) and every trust header.
pub fn filter_headers_for_upstream(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name, headers)
            || name == http::header::HOST
            || name == http::header::CONTENT_LENGTH
            || TRUST_HEADERS.contains(&name.as_str())
        {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Copies backend response headers that may be relayed to the caller.
pub fn filter_headers_for_downstream(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name, headers) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Adds the correlation and identity trust headers.
pub fn inject_trust_headers(
    headers: &mut HeaderMap,
    correlation_id: &CorrelationId,
    identity: Option<&Identity>,
) {
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        headers.insert(CORRELATION_ID_HEADER, value);
    }

    let Some(identity) = identity else {
        return;
    };
    let role = identity.role.to_string();
    for (name, value) in [
        (&HEADER_USER_ID, identity.subject_id.as_str()),
        (&HEADER_USER_ROLE, role.as_str()),
        (&HEADER_USER_EMAIL, identity.email.as_str()),
    ] {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(name.clone(), value);
            }
            Err(_) => tracing::warn!(header = %name, "identity claim is not a valid header value"),
        }
    }
}

/// Appends the immediate peer `hop` to the inbound `x-forwarded-for` chain.
pub fn append_forwarded_for(headers: &mut HeaderMap, inbound: &HeaderMap, hop: Option<IpAddr>) {
    let Some(client) = hop else {
        return;
    };
    let chain = inbound
        .get(&HEADER_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let value = match chain {
        Some(chain) => format!("{chain}, {client}"),
        None => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HEADER_FORWARDED_FOR.clone(), value);
    }
}

/// Resolves the caller's address.
///
/// With `trust_proxy`, the first `x-forwarded-for` entry wins, then
/// `x-real-ip`; unparsable values fall back to the socket peer.
pub fn resolve_client_ip(headers: &HeaderMap, peer: SocketAddr, trust_proxy: bool) -> IpAddr {
    if !trust_proxy {
        return peer.ip();
    }

    let forwarded = headers
        .get(&HEADER_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    let real_ip = || {
        headers
            .get(&HEADER_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };

    forwarded.or_else(real_ip).unwrap_or_else(|| peer.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use threshold_core::Role;

    fn identity() -> Identity {
        Identity {
            subject_id: "u-42".to_string(),
            email: "agent@example.com".to_string(),
            role: Role::Agent,
            issued_at: 0,
            expires_at: 0,
        }
    }

    #[test]
    fn test_upstream_filter_strips_spoofed_trust_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("x-user-id", HeaderValue::from_static("admin"));
        headers.insert("x-user-role", HeaderValue::from_static("super-admin"));
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert("host", HeaderValue::from_static("gateway"));

        let filtered = filter_headers_for_upstream(&headers);
        assert!(filtered.contains_key("content-type"));
        assert!(filtered.contains_key("authorization"));
        assert!(!filtered.contains_key("x-user-id"));
        assert!(!filtered.contains_key("x-user-role"));
        assert!(!filtered.contains_key("connection"));
        assert!(!filtered.contains_key("x-secret"));
        assert!(!filtered.contains_key("host"));
    }

    #[test]
    fn test_downstream_filter() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let filtered = filter_headers_for_downstream(&headers);
        assert!(!filtered.contains_key("transfer-encoding"));
        assert_eq!(filtered.get_all("set-cookie").iter().count(), 2);
    }

    #[test]
    fn test_inject_with_identity() {
        let mut headers = HeaderMap::new();
        let id = CorrelationId::from_header(Some("c-9"));
        inject_trust_headers(&mut headers, &id, Some(&identity()));

        assert_eq!(headers.get(CORRELATION_ID_HEADER).unwrap(), "c-9");
        assert_eq!(headers.get(&HEADER_USER_ID).unwrap(), "u-42");
        assert_eq!(headers.get(&HEADER_USER_ROLE).unwrap(), "agent");
        assert_eq!(headers.get(&HEADER_USER_EMAIL).unwrap(), "agent@example.com");
    }

    #[test]
    fn test_inject_anonymous() {
        let mut headers = HeaderMap::new();
        inject_trust_headers(&mut headers, &CorrelationId::new(), None);
        assert!(headers.contains_key(CORRELATION_ID_HEADER));
        assert!(!headers.contains_key(&HEADER_USER_ID));
    }

    #[test]
    fn test_forwarded_for_chain() {
        let mut inbound = HeaderMap::new();
        inbound.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        let mut out = HeaderMap::new();
        append_forwarded_for(&mut out, &inbound, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(out.get("x-forwarded-for").unwrap(), "198.51.100.1, 10.0.0.5");
    }

    #[test]
    fn test_client_ip_resolution() {
        let peer: SocketAddr = "10.0.0.5:41000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.8"));

        assert_eq!(resolve_client_ip(&headers, peer, false), peer.ip());
        assert_eq!(
            resolve_client_ip(&headers, peer, true),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );

        headers.remove("x-forwarded-for");
        assert_eq!(
            resolve_client_ip(&headers, peer, true),
            "203.0.113.8".parse::<IpAddr>().unwrap()
        );

        headers.insert("x-real-ip", HeaderValue::from_static("garbage"));
        assert_eq!(resolve_client_ip(&headers, peer, true), peer.ip());
    }
}
