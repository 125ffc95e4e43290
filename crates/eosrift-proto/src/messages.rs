//! Control message types
//!
//! Control messages are JSON lines exchanged over a dedicated yamux stream.
//! The `type` field discriminates tunnel kinds; field names match the wire
//! format expected by deployed servers.

use serde::{Deserialize, Serialize};

/// A header name/value pair carried in tunnel requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderKv {
    pub name: String,
    pub value: String,
}

/// Request to create a tunnel, sent by the client on the control stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TunnelRequest {
    Http(HttpTunnelRequest),
    Tcp(TcpTunnelRequest),
}

/// Tunnel kind discriminator, used to shape error responses before a
/// request has been fully parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Http,
    Tcp,
}

impl TunnelRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            TunnelRequest::Http(_) => RequestKind::Http,
            TunnelRequest::Tcp(_) => RequestKind::Tcp,
        }
    }

    pub fn authtoken(&self) -> &str {
        match self {
            TunnelRequest::Http(req) => &req.authtoken,
            TunnelRequest::Tcp(req) => &req.authtoken,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpTunnelRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authtoken: String,

    /// Reserved subdomain to request. Mutually exclusive with `domain`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subdomain: String,

    /// Full domain to request; must sit under the server's tunnel domain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    /// `user:pass` credential enforced on the public URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub basic_auth: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_method: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_path_prefix: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_cidr: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_header_add: Vec<HeaderKv>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_header_remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_header_add: Vec<HeaderKv>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_header_remove: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpTunnelRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authtoken: String,

    /// Requested public port; 0 auto-allocates from the server's range.
    #[serde(default)]
    pub remote_port: u16,
}

/// Response to a tunnel request, written by the server on the control stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TunnelResponse {
    Http(HttpTunnelResponse),
    Tcp(TcpTunnelResponse),
}

impl TunnelResponse {
    /// Build an error response shaped for the given request kind.
    pub fn error(kind: RequestKind, message: impl Into<String>) -> Self {
        match kind {
            RequestKind::Http => TunnelResponse::Http(HttpTunnelResponse {
                id: String::new(),
                url: String::new(),
                error: Some(message.into()),
            }),
            RequestKind::Tcp => TunnelResponse::Tcp(TcpTunnelResponse {
                remote_port: 0,
                error: Some(message.into()),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpTunnelResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpTunnelResponse {
    #[serde(default)]
    pub remote_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_roundtrip() {
        let req = TunnelRequest::Http(HttpTunnelRequest {
            authtoken: "eos_abc".into(),
            subdomain: "demo".into(),
            allow_method: vec!["GET".into()],
            request_header_add: vec![HeaderKv {
                name: "X-Test".into(),
                value: "1".into(),
            }],
            ..Default::default()
        });

        let encoded = serde_json::to_string(&req).unwrap();
        assert!(encoded.contains("\"type\":\"http\""));
        assert!(encoded.contains("\"subdomain\":\"demo\""));

        let decoded: TunnelRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_tcp_request_wire_shape() {
        let decoded: TunnelRequest =
            serde_json::from_str(r#"{"type":"tcp","authtoken":"t","remote_port":20001}"#).unwrap();
        match decoded {
            TunnelRequest::Tcp(req) => {
                assert_eq!(req.remote_port, 20001);
                assert_eq!(req.authtoken, "t");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_omitted_fields_default() {
        let decoded: TunnelRequest = serde_json::from_str(r#"{"type":"http"}"#).unwrap();
        match decoded {
            TunnelRequest::Http(req) => {
                assert!(req.authtoken.is_empty());
                assert!(req.allow_method.is_empty());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_error_response_shape() {
        let resp = TunnelResponse::error(RequestKind::Tcp, "unauthorized");
        let encoded = serde_json::to_string(&resp).unwrap();
        assert!(encoded.contains("\"type\":\"tcp\""));
        assert!(encoded.contains("\"error\":\"unauthorized\""));
    }
}
