//! Host parsing and request identity helpers

use axum::http::{HeaderMap, Request};
use eosrift_proto::validate::canonical_ip;
use std::net::{IpAddr, SocketAddr};

/// Lowercase a host, dropping a trailing dot and a port if present.
pub fn normalize_domain(domain: &str) -> String {
    let mut d = domain.trim().trim_end_matches('.').to_ascii_lowercase();

    if let Some(rest) = d.strip_prefix('[') {
        // Bracketed IPv6 literal, possibly with a port.
        if let Some((host, _)) = rest.split_once(']') {
            return host.to_string();
        }
    }
    if let Some((host, port)) = d.rsplit_once(':') {
        if port.chars().all(|c| c.is_ascii_digit()) && !host.is_empty() {
            d = host.to_string();
        }
    }
    d
}

/// Whether the request host is exactly the base domain.
pub fn is_base_domain_host(host: &str, base_domain: &str) -> bool {
    let base = normalize_domain(base_domain);
    if base.is_empty() {
        return false;
    }
    normalize_domain(host) == base
}

/// Extract the tunnel id from a public host: exactly one label directly
/// under the tunnel domain.
pub fn tunnel_id_from_host(host: &str, tunnel_domain: &str) -> Option<String> {
    let h = normalize_domain(host);
    let td = normalize_domain(tunnel_domain);
    if td.is_empty() {
        return None;
    }

    let prefix = h.strip_suffix(&format!(".{td}"))?;
    if prefix.is_empty() || prefix.contains('.') {
        return None;
    }
    Some(prefix.to_string())
}

/// The request's Host, from the URI when absolute, else the Host header.
pub fn request_host<B>(request: &Request<B>) -> String {
    if let Some(host) = request.uri().host() {
        return host.to_string();
    }
    header_host(request.headers())
}

fn header_host(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Resolve the client IP for access control. Proxy headers are only
/// trusted when the deployment says so; otherwise the peer address wins.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers {
        if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if let Some(ip) = parse_ip(first) {
                return Some(ip);
            }
        }
        if let Some(value) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if let Some(ip) = parse_ip(value) {
                return Some(ip);
            }
        }
    }

    peer.map(|addr| canonical_ip(addr.ip()))
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let s = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if s.is_empty() {
        return None;
    }
    s.parse::<IpAddr>().ok().map(canonical_ip)
}

/// Compare two secrets without leaking the mismatch position.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" Eosrift.Test. "), "eosrift.test");
        assert_eq!(normalize_domain("eosrift.test:8080"), "eosrift.test");
        assert_eq!(normalize_domain("[::1]:8080"), "::1");
    }

    #[test]
    fn test_tunnel_id_from_host() {
        assert_eq!(
            tunnel_id_from_host("demo.tunnel.eosrift.test", "tunnel.eosrift.test"),
            Some("demo".to_string())
        );
        assert_eq!(
            tunnel_id_from_host("Demo.Tunnel.Eosrift.Test:443", "tunnel.eosrift.test"),
            Some("demo".to_string())
        );
        // apex, nested labels, unrelated hosts
        assert_eq!(tunnel_id_from_host("tunnel.eosrift.test", "tunnel.eosrift.test"), None);
        assert_eq!(
            tunnel_id_from_host("a.b.tunnel.eosrift.test", "tunnel.eosrift.test"),
            None
        );
        assert_eq!(tunnel_id_from_host("demo.other.test", "tunnel.eosrift.test"), None);
        assert_eq!(tunnel_id_from_host("demo.tunnel.eosrift.test", ""), None);
    }

    #[test]
    fn test_is_base_domain_host() {
        assert!(is_base_domain_host("eosrift.test", "eosrift.test"));
        assert!(is_base_domain_host("EOSRIFT.test:443", "eosrift.test"));
        assert!(!is_base_domain_host("x.eosrift.test", "eosrift.test"));
        assert!(!is_base_domain_host("eosrift.test", ""));
    }

    #[test]
    fn test_client_ip_trust_modes() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();

        let trusted = client_ip(&headers, Some(peer), true).unwrap();
        assert_eq!(trusted.to_string(), "203.0.113.9");

        let untrusted = client_ip(&headers, Some(peer), false).unwrap();
        assert_eq!(untrusted.to_string(), "192.0.2.1");

        assert!(client_ip(&headers, None, false).is_none());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
    }
}
