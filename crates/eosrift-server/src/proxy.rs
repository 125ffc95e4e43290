//! HTTP tunnel proxy
//!
//! Public requests for `<id>.<tunnel-domain>` are forwarded to the owning
//! client over a fresh yamux stream: an HTTP/1.1 client handshake runs on
//! the stream and the request is replayed with its original Host. Policy
//! (method/path allowlists, CIDR filters, basic auth, header transforms)
//! is enforced here, before any bytes reach the tunnel.

use crate::host::{client_ip, constant_time_eq, request_host, tunnel_id_from_host};
use crate::registry::TunnelPolicy;
use crate::SharedState;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Response, StatusCode, Uri};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use eosrift_proto::validate::cidr_list_contains;
use hyper::client::conn::http1;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::io::copy_bidirectional;
use tracing::debug;

#[derive(Debug, Error)]
enum ProxyError {
    #[error("tunnel stream unavailable: {0}")]
    Stream(#[from] eosrift_transport::TransportError),

    #[error("upstream http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request uri")]
    InvalidUri,
}

/// Entry point for requests that did not match a server route.
pub async fn proxy_request(state: SharedState, mut request: Request<Body>) -> Response<Body> {
    let host = request_host(&request);

    let Some(id) = tunnel_id_from_host(&host, &state.config.tunnel_domain) else {
        return plain_response(StatusCode::NOT_FOUND, "not found");
    };
    let Some(entry) = state.registry.get_http_tunnel(&id) else {
        return plain_response(StatusCode::NOT_FOUND, "not found");
    };
    let policy = entry.policy.clone();

    if !method_allowed(&policy, request.method().as_str()) {
        return plain_response(StatusCode::NOT_FOUND, "not found");
    }
    if !path_allowed(&policy, request.uri().path()) {
        return plain_response(StatusCode::NOT_FOUND, "not found");
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer, state.config.trust_proxy_headers);

    if !policy.allow_cidrs.is_empty() || !policy.deny_cidrs.is_empty() {
        let Some(ip) = ip else {
            return plain_response(StatusCode::FORBIDDEN, "forbidden");
        };
        if cidr_list_contains(&policy.deny_cidrs, ip) {
            return plain_response(StatusCode::FORBIDDEN, "forbidden");
        }
        if !policy.allow_cidrs.is_empty() && !cidr_list_contains(&policy.allow_cidrs, ip) {
            return plain_response(StatusCode::FORBIDDEN, "forbidden");
        }
    }

    if let Some(expected) = &policy.basic_auth {
        let presented = basic_auth_credentials(request.headers());
        let ok = presented.as_ref().is_some_and(|(user, pass)| {
            constant_time_eq(user.as_bytes(), expected.username.as_bytes())
                && constant_time_eq(pass.as_bytes(), expected.password.as_bytes())
        });
        if !ok {
            let mut response = plain_response(StatusCode::UNAUTHORIZED, "unauthorized");
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="EosRift""#),
            );
            return response;
        }
        // The credential authenticated the edge, not the upstream.
        request.headers_mut().remove(header::AUTHORIZATION);
    }

    match forward(&state, &entry.session, &policy, request, &host, ip).await {
        Ok(response) => response,
        Err(err) => {
            debug!(%id, "proxy error: {err}");
            plain_response(StatusCode::BAD_GATEWAY, "bad gateway")
        }
    }
}

async fn forward(
    state: &SharedState,
    session: &eosrift_transport::MuxSession,
    policy: &TunnelPolicy,
    request: Request<Body>,
    host: &str,
    ip: Option<IpAddr>,
) -> Result<Response<Body>, ProxyError> {
    let stream = session.open_stream().await?;
    let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.with_upgrades().await {
            debug!("tunnel connection ended: {err}");
        }
    });

    let (mut parts, body) = request.into_parts();

    // Origin-form URI; the original Host rides in the Host header.
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    parts.uri = path_and_query
        .parse::<Uri>()
        .map_err(|_| ProxyError::InvalidUri)?;

    let wants_upgrade = is_upgrade_request(&parts.headers);
    let upgrade_protocol = parts
        .headers
        .get(header::UPGRADE)
        .cloned();
    let inbound_upgrade = if wants_upgrade {
        parts.extensions.remove::<OnUpgrade>()
    } else {
        None
    };

    prepare_forward_headers(
        &mut parts.headers,
        host,
        ip,
        state.config.trust_proxy_headers,
        wants_upgrade,
        upgrade_protocol,
    );
    apply_header_transforms(
        &mut parts.headers,
        &policy.request_header_remove,
        &policy.request_header_add,
    );

    let outbound = Request::from_parts(parts, body);
    let mut response = sender.send_request(outbound).await?;

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(inbound_upgrade) = inbound_upgrade {
            let upstream_upgrade = hyper::upgrade::on(&mut response);
            tokio::spawn(async move {
                match tokio::try_join!(inbound_upgrade, upstream_upgrade) {
                    Ok((inbound, upstream)) => {
                        let mut inbound = TokioIo::new(inbound);
                        let mut upstream = TokioIo::new(upstream);
                        let _ = copy_bidirectional(&mut inbound, &mut upstream).await;
                    }
                    Err(err) => debug!("upgrade failed: {err}"),
                }
            });
        }
    }

    let mut response = response.map(Body::new);
    apply_header_transforms(
        response.headers_mut(),
        &policy.response_header_remove,
        &policy.response_header_add,
    );
    Ok(response)
}

fn method_allowed(policy: &TunnelPolicy, method: &str) -> bool {
    if policy.allow_methods.is_empty() {
        return true;
    }
    let method = method.to_ascii_uppercase();
    policy.allow_methods.iter().any(|m| *m == method)
}

fn path_allowed(policy: &TunnelPolicy, path: &str) -> bool {
    if policy.allow_paths.is_empty() && policy.allow_path_prefixes.is_empty() {
        return true;
    }
    if policy.allow_paths.iter().any(|p| p == path) {
        return true;
    }
    policy
        .allow_path_prefixes
        .iter()
        .any(|p| !p.is_empty() && path.starts_with(p.as_str()))
}

fn basic_auth_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ").or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

const FORWARDED_HEADERS: &[&str] = &[
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-port",
    "x-real-ip",
];

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn prepare_forward_headers(
    headers: &mut HeaderMap,
    host: &str,
    ip: Option<IpAddr>,
    trust_proxy_headers: bool,
    wants_upgrade: bool,
    upgrade_protocol: Option<HeaderValue>,
) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }

    if wants_upgrade {
        if let Some(protocol) = upgrade_protocol {
            headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
            headers.insert(header::UPGRADE, protocol);
        }
    }

    if !trust_proxy_headers {
        // Strip proxy-provided identity headers from untrusted clients and
        // regenerate them from the connection.
        for name in FORWARDED_HEADERS {
            headers.remove(*name);
        }
        if let Some(ip) = ip {
            if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
                headers.insert(HeaderName::from_static("x-forwarded-for"), value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), value);
        }
        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static("http"),
        );
    }

    // Preserve the public Host (ngrok-like) on the tunneled request.
    if let Ok(value) = HeaderValue::from_str(host) {
        headers.insert(header::HOST, value);
    }
}

fn apply_header_transforms(
    headers: &mut HeaderMap,
    remove: &[String],
    add: &[(String, String)],
) {
    for name in remove {
        if let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes()) {
            headers.remove(&name);
        }
    }
    for (name, value) in add {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        headers.insert(name, value);
    }
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
}

fn plain_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(format!("{message}\n")))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
