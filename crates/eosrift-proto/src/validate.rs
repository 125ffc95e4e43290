//! Validation of client-supplied tunnel policy
//!
//! Everything here runs on untrusted input from the control stream. Lists
//! are bounded, header material is checked against injection, and CIDRs are
//! normalized before they reach the proxy path.

use crate::{ProtoError, MAX_HEADER_VALUE_BYTES, MAX_LIST_ENTRIES};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Parsed `user:pass` credential for HTTP basic auth on the public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuthSpec {
    pub username: String,
    pub password: String,
}

/// Parse and normalize a list of HTTP methods: trimmed, uppercased,
/// header-token charset only.
pub fn parse_method_list(field: &str, values: &[String]) -> Result<Vec<String>, ProtoError> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    if values.len() > MAX_LIST_ENTRIES {
        return Err(ProtoError::TooManyEntries {
            field: field.to_string(),
        });
    }

    let mut out = Vec::with_capacity(values.len());
    for raw in values {
        let s = raw.trim();
        if s.is_empty() || !is_header_token(s) {
            return Err(ProtoError::invalid(field, raw));
        }
        out.push(s.to_ascii_uppercase());
    }
    Ok(out)
}

/// Parse a list of request paths: absolute, no query/fragment, no control
/// characters or whitespace.
pub fn parse_path_list(field: &str, values: &[String]) -> Result<Vec<String>, ProtoError> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    if values.len() > MAX_LIST_ENTRIES {
        return Err(ProtoError::TooManyEntries {
            field: field.to_string(),
        });
    }

    let mut out = Vec::with_capacity(values.len());
    for raw in values {
        let s = raw.trim();
        if s.is_empty() || !s.starts_with('/') {
            return Err(ProtoError::invalid(field, raw));
        }
        if s.contains(['?', '#']) || !is_safe_path(s) {
            return Err(ProtoError::invalid(field, raw));
        }
        out.push(s.to_string());
    }
    Ok(out)
}

/// Parse a list of CIDRs. Bare addresses become host networks (/32 or
/// /128); IPv4-mapped IPv6 addresses collapse to IPv4.
pub fn parse_cidr_list(field: &str, values: &[String]) -> Result<Vec<IpNetwork>, ProtoError> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    if values.len() > MAX_LIST_ENTRIES {
        return Err(ProtoError::TooManyEntries {
            field: field.to_string(),
        });
    }

    let mut out = Vec::with_capacity(values.len());
    for raw in values {
        let s = raw.trim();
        if s.is_empty() {
            return Err(ProtoError::invalid(field, raw));
        }

        let network = if s.contains('/') {
            s.parse::<IpNetwork>()
                .map_err(|_| ProtoError::invalid(field, raw))?
        } else {
            let addr = s
                .parse::<IpAddr>()
                .map_err(|_| ProtoError::invalid(field, raw))?;
            let addr = canonical_ip(addr);
            let bits = if addr.is_ipv4() { 32 } else { 128 };
            IpNetwork::new(addr, bits).map_err(|_| ProtoError::invalid(field, raw))?
        };

        out.push(network);
    }
    Ok(out)
}

/// Collapse IPv4-mapped IPv6 addresses so CIDR checks see one family.
pub fn canonical_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Check whether `ip` is covered by any network in the list.
pub fn cidr_list_contains(networks: &[IpNetwork], ip: IpAddr) -> bool {
    let ip = canonical_ip(ip);
    networks.iter().any(|network| network.contains(ip))
}

/// Validate a header name for use in transforms. Hop-by-hop headers and
/// headers the proxy owns are rejected.
pub fn normalize_header_name(field: &str, raw: &str) -> Result<String, ProtoError> {
    let s = raw.trim();
    if s.is_empty() || !is_header_token(s) {
        return Err(ProtoError::invalid(field, raw));
    }
    if http::header::HeaderName::from_bytes(s.as_bytes()).is_err() {
        return Err(ProtoError::invalid(field, raw));
    }
    if is_disallowed_transform_header(s) {
        return Err(ProtoError::invalid(field, raw));
    }
    Ok(s.to_string())
}

/// Validate a header value for use in transforms.
pub fn validate_header_value(field: &str, name: &str, value: &str) -> Result<String, ProtoError> {
    let v = value.trim();
    if v.len() > MAX_HEADER_VALUE_BYTES || !is_safe_header_value(v) {
        return Err(ProtoError::invalid(field, name));
    }
    Ok(v.to_string())
}

/// Parse a `user:pass` basic-auth spec. Empty input means no basic auth.
pub fn parse_basic_auth(raw: &str) -> Result<Option<BasicAuthSpec>, ProtoError> {
    let s = raw.trim();
    if s.is_empty() {
        return Ok(None);
    }

    let (username, password) = s
        .split_once(':')
        .ok_or_else(|| ProtoError::invalid("basic_auth", "<redacted>"))?;
    if username.is_empty() {
        return Err(ProtoError::invalid("basic_auth", "<redacted>"));
    }

    Ok(Some(BasicAuthSpec {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

fn is_header_token(s: &str) -> bool {
    s.bytes().all(|c| {
        c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
    })
}

fn is_safe_path(s: &str) -> bool {
    s.bytes().all(|c| c > 0x20 && c != 0x7f)
}

fn is_safe_header_value(s: &str) -> bool {
    s.bytes()
        .all(|c| c != b'\r' && c != b'\n' && c != 0 && c != 0x7f && (c >= 0x20 || c == b'\t'))
}

fn is_disallowed_transform_header(name: &str) -> bool {
    const DISALLOWED: &[&str] = &[
        "connection",
        "proxy-connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
        "content-length",
        "host",
    ];
    DISALLOWED
        .iter()
        .any(|d| name.eq_ignore_ascii_case(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_list_normalizes() {
        let got = parse_method_list("allow_method", &[" get ".into()]).unwrap();
        assert_eq!(got, vec!["GET".to_string()]);
    }

    #[test]
    fn test_method_list_rejects_invalid_token() {
        assert!(parse_method_list("allow_method", &["G ET".into()]).is_err());
        assert!(parse_method_list("allow_method", &["GET\r\n".into()]).is_err());
    }

    #[test]
    fn test_method_list_enforces_max_entries() {
        let values: Vec<String> = (0..=MAX_LIST_ENTRIES).map(|_| "GET".into()).collect();
        assert!(matches!(
            parse_method_list("allow_method", &values),
            Err(ProtoError::TooManyEntries { .. })
        ));
    }

    #[test]
    fn test_path_list_accepts_absolute() {
        let got = parse_path_list("allow_path", &[" /healthz ".into()]).unwrap();
        assert_eq!(got, vec!["/healthz".to_string()]);
    }

    #[test]
    fn test_path_list_rejects_relative_and_query() {
        assert!(parse_path_list("allow_path", &["healthz".into()]).is_err());
        assert!(parse_path_list("allow_path", &["/x?y=1".into()]).is_err());
        assert!(parse_path_list("allow_path", &["/bad path".into()]).is_err());
    }

    #[test]
    fn test_cidr_list_accepts_cidr_and_bare_ip() {
        let got =
            parse_cidr_list("allow_cidr", &["1.2.3.0/24".into(), "1.2.3.4".into()]).unwrap();
        assert_eq!(got[0].to_string(), "1.2.3.0/24");
        assert_eq!(got[1].to_string(), "1.2.3.4/32");
    }

    #[test]
    fn test_cidr_list_rejects_garbage() {
        assert!(parse_cidr_list("allow_cidr", &["nope".into()]).is_err());
    }

    #[test]
    fn test_cidr_contains_unmaps_v4_in_v6() {
        let networks = parse_cidr_list("allow_cidr", &["10.0.0.0/8".into()]).unwrap();
        let mapped: IpAddr = "::ffff:10.1.2.3".parse().unwrap();
        assert!(cidr_list_contains(&networks, mapped));
        assert!(!cidr_list_contains(&networks, "11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_header_name_rejects_disallowed() {
        assert!(normalize_header_name("request_header_add", "Host").is_err());
        assert!(normalize_header_name("request_header_add", "transfer-encoding").is_err());
        assert_eq!(
            normalize_header_name("request_header_add", " X-Test ").unwrap(),
            "X-Test"
        );
    }

    #[test]
    fn test_header_value_rejects_injection() {
        assert!(validate_header_value("request_header_add", "X-Test", "ok\r\nX-Evil: 1").is_err());
        assert_eq!(
            validate_header_value("request_header_add", "X-Test", " ok ").unwrap(),
            "ok"
        );
    }

    #[test]
    fn test_basic_auth_parsing() {
        assert_eq!(parse_basic_auth("").unwrap(), None);
        let spec = parse_basic_auth("user:pa:ss").unwrap().unwrap();
        assert_eq!(spec.username, "user");
        assert_eq!(spec.password, "pa:ss");
        assert!(parse_basic_auth("nopass").is_err());
        assert!(parse_basic_auth(":pass").is_err());
    }
}
