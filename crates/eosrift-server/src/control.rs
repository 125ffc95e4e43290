//! Control plane
//!
//! `GET /control` upgrades to a WebSocket carrying a yamux session. The
//! first stream the client opens is the control stream: one JSON request,
//! one JSON response. Authentication, per-token limits, and rate limiting
//! all happen before the request is dispatched; every refusal is answered
//! on the control stream in the shape the client asked for.

use crate::host::tunnel_id_from_host;
use crate::registry::{HttpTunnelEntry, TunnelPolicy};
use crate::ws::AxumWsStream;
use crate::SharedState;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use eosrift_auth::Store;
use eosrift_proto::{
    read_json, write_json, HttpTunnelRequest, HttpTunnelResponse, RequestKind, TcpTunnelRequest,
    TcpTunnelResponse, TunnelRequest, TunnelResponse,
};
use eosrift_transport::{MuxSession, MuxStream};
use std::sync::Arc;
use tokio::io::copy_bidirectional;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub async fn control_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_control(state, socket))
}

async fn handle_control(state: SharedState, socket: WebSocket) {
    let _conn_guard = state.metrics.track_control_conn();

    let session = Arc::new(MuxSession::server(AxumWsStream::new(socket)));

    let mut ctrl = match session.accept_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            debug!("control accept stream error: {err}");
            return;
        }
    };

    let request = match read_request(&mut ctrl).await {
        Ok(request) => request,
        Err((kind, message)) => {
            refuse(&mut ctrl, kind, message).await;
            return;
        }
    };
    let kind = request.kind();

    // Token validation: the store when present, else the static bootstrap
    // token from the environment.
    if let Some(store) = &state.store {
        match store.validate_token(request.authtoken()).await {
            Err(err) => {
                warn!("token validation error: {err}");
                refuse(&mut ctrl, kind, "auth error").await;
                return;
            }
            Ok(false) => {
                refuse(&mut ctrl, kind, "unauthorized").await;
                return;
            }
            Ok(true) => {}
        }
    } else if !state.config.auth_token.is_empty()
        && request.authtoken().trim() != state.config.auth_token
    {
        refuse(&mut ctrl, kind, "unauthorized").await;
        return;
    }

    let token_id = match &state.store {
        Some(store) => match store.token_id(request.authtoken()).await {
            Ok(id) => id.unwrap_or(0),
            Err(err) => {
                warn!("token resolution error: {err}");
                refuse(&mut ctrl, kind, "auth error").await;
                return;
            }
        },
        None => 0,
    };

    let _permit = if state.config.max_tunnels_per_token > 0 && token_id > 0 {
        match state
            .limiter
            .try_acquire(token_id, state.config.max_tunnels_per_token)
        {
            Some(permit) => Some(permit),
            None => {
                refuse(&mut ctrl, kind, "too many active tunnels").await;
                return;
            }
        }
    } else {
        None
    };

    if state.config.max_tunnel_creates_per_minute > 0
        && token_id > 0
        && !state
            .rate_limiter
            .allow(token_id, state.config.max_tunnel_creates_per_minute)
    {
        refuse(&mut ctrl, kind, "rate limit exceeded").await;
        return;
    }

    match request {
        TunnelRequest::Tcp(request) => {
            handle_tcp_control(&state, session, ctrl, request, token_id).await
        }
        TunnelRequest::Http(request) => {
            handle_http_control(&state, session, ctrl, request, token_id).await
        }
    }
}

/// Decode the control request, classifying failures the way clients
/// expect: garbage is "invalid request", a well-formed request of an
/// unknown type is "unsupported tunnel type".
async fn read_request(
    ctrl: &mut MuxStream,
) -> Result<TunnelRequest, (RequestKind, &'static str)> {
    let value: serde_json::Value = read_json(ctrl)
        .await
        .map_err(|_| (RequestKind::Tcp, "invalid request"))?;

    let kind = match value.get("type").and_then(|t| t.as_str()) {
        Some("http") => RequestKind::Http,
        Some("tcp") => RequestKind::Tcp,
        _ => return Err((RequestKind::Tcp, "unsupported tunnel type")),
    };

    serde_json::from_value::<TunnelRequest>(value).map_err(|_| (kind, "invalid request"))
}

async fn refuse(ctrl: &mut MuxStream, kind: RequestKind, message: &str) {
    let _ = write_json(ctrl, &TunnelResponse::error(kind, message)).await;
}

async fn handle_tcp_control(
    state: &SharedState,
    session: Arc<MuxSession>,
    mut ctrl: MuxStream,
    request: TcpTunnelRequest,
    token_id: i64,
) {
    let listener = match allocate_tcp_listener(state, request.remote_port, token_id).await {
        Ok(listener) => listener,
        Err(message) => {
            refuse(&mut ctrl, RequestKind::Tcp, message).await;
            return;
        }
    };

    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(err) => {
            warn!("tcp listener addr error: {err}");
            refuse(&mut ctrl, RequestKind::Tcp, "requested port unavailable").await;
            return;
        }
    };

    let response = TunnelResponse::Tcp(TcpTunnelResponse {
        remote_port: port,
        error: None,
    });
    if write_json(&mut ctrl, &response).await.is_err() {
        return;
    }
    drop(ctrl);

    let _tunnel_guard = state.metrics.track_tcp_tunnel();
    info!(port, token_id, "tcp tunnel open");

    loop {
        tokio::select! {
            _ = session.wait_closed() => break,
            accepted = listener.accept() => {
                let Ok((inbound, _peer)) = accepted else { break };
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    let mut inbound = inbound;
                    let Ok(mut stream) = session.open_stream().await else { return };
                    let _ = copy_bidirectional(&mut inbound, &mut stream).await;
                });
            }
        }
    }

    session.close().await;
    info!(port, "tcp tunnel closed");
}

/// Bind a public listener for a TCP tunnel. A requested port must lie in
/// the configured range and, when reservations are available, belong to
/// the requesting token; first use reserves it. Auto-allocation scans the
/// range, skipping ports reserved by other tokens.
async fn allocate_tcp_listener(
    state: &SharedState,
    requested_port: u16,
    token_id: i64,
) -> Result<TcpListener, &'static str> {
    let start = state.config.tcp_port_range_start;
    let end = state.config.tcp_port_range_end;

    if requested_port != 0 {
        if requested_port < start || requested_port > end {
            return Err("requested port out of range");
        }

        if let Some(store) = &state.store {
            claim_tcp_port(store, requested_port, token_id).await?;
        }

        return TcpListener::bind(("0.0.0.0", requested_port))
            .await
            .map_err(|_| "requested port unavailable");
    }

    if start == 0 || end == 0 || end < start {
        return Err("invalid tcp port range");
    }

    let reserved_by_others: Vec<u16> = match &state.store {
        Some(store) => store
            .list_reserved_tcp_ports()
            .await
            .map_err(|_| "auth error")?
            .into_iter()
            .filter(|r| r.token_id != token_id)
            .map(|r| r.port)
            .collect(),
        None => Vec::new(),
    };

    for port in start..=end {
        if reserved_by_others.contains(&port) {
            continue;
        }
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
            return Ok(listener);
        }
    }

    Err("no ports available")
}

/// Enforce and establish ownership of a requested port.
async fn claim_tcp_port(store: &Store, port: u16, token_id: i64) -> Result<(), &'static str> {
    match store.reserved_tcp_port_token_id(port).await {
        Err(_) => return Err("auth error"),
        Ok(Some(owner)) if owner != token_id => return Err("unauthorized"),
        Ok(Some(_)) => return Ok(()),
        Ok(None) => {}
    }

    if token_id <= 0 {
        return Err("unauthorized");
    }

    if store.reserve_tcp_port(token_id, port).await.is_err() {
        // Lost a reservation race; honor the winner.
        return match store.reserved_tcp_port_token_id(port).await {
            Ok(Some(owner)) if owner == token_id => Ok(()),
            Ok(Some(_)) => Err("unauthorized"),
            _ => Err("failed to reserve port"),
        };
    }

    Ok(())
}

async fn handle_http_control(
    state: &SharedState,
    session: Arc<MuxSession>,
    mut ctrl: MuxStream,
    request: HttpTunnelRequest,
    token_id: i64,
) {
    let id = match resolve_tunnel_id(state, &request, token_id).await {
        Ok(id) => id,
        Err(message) => {
            refuse(&mut ctrl, RequestKind::Http, message).await;
            return;
        }
    };

    let policy = match TunnelPolicy::from_request(&request) {
        Ok(policy) => policy,
        Err(err) => {
            let _ = write_json(
                &mut ctrl,
                &TunnelResponse::Http(HttpTunnelResponse {
                    id: String::new(),
                    url: String::new(),
                    error: Some(err.to_string()),
                }),
            )
            .await;
            return;
        }
    };

    let entry = HttpTunnelEntry {
        session: Arc::clone(&session),
        policy: Arc::new(policy),
    };
    if state.registry.register_http_tunnel(&id, entry).is_err() {
        refuse(&mut ctrl, RequestKind::Http, "failed to register tunnel").await;
        return;
    }

    let tunnel_domain = state.config.tunnel_domain.trim_end_matches('.');
    let url = format!("https://{id}.{tunnel_domain}");

    let response = TunnelResponse::Http(HttpTunnelResponse {
        id: id.clone(),
        url: url.clone(),
        error: None,
    });
    if write_json(&mut ctrl, &response).await.is_err() {
        state.registry.unregister_http_tunnel(&id);
        return;
    }
    drop(ctrl);

    let _tunnel_guard = state.metrics.track_http_tunnel();
    info!(%id, %url, token_id, "http tunnel open");

    session.wait_closed().await;
    state.registry.unregister_http_tunnel(&id);
    info!(%id, "http tunnel closed");
}

/// Work out the public id for an HTTP tunnel: a random label when nothing
/// was requested, otherwise the reserved (or auto-reserved) name.
async fn resolve_tunnel_id(
    state: &SharedState,
    request: &HttpTunnelRequest,
    token_id: i64,
) -> Result<String, &'static str> {
    let domain = request.domain.trim();
    let subdomain = request.subdomain.trim();

    if domain.is_empty() && subdomain.is_empty() {
        return state
            .registry
            .allocate_id()
            .map_err(|_| "failed to allocate id");
    }
    if !domain.is_empty() && !subdomain.is_empty() {
        return Err("invalid request");
    }

    let Some(store) = &state.store else {
        return Err("unauthorized");
    };
    if token_id <= 0 {
        return Err("unauthorized");
    }

    let desired = if !domain.is_empty() {
        let host = if domain.contains("://") {
            match url::Url::parse(domain) {
                Ok(parsed) => match parsed.host_str() {
                    Some(host) => host.to_string(),
                    None => return Err("invalid domain"),
                },
                Err(_) => return Err("invalid domain"),
            }
        } else {
            domain.to_string()
        };

        tunnel_id_from_host(&host, &state.config.tunnel_domain).ok_or("invalid domain")?
    } else {
        subdomain.to_string()
    };

    match store.reserved_subdomain_token_id(&desired).await {
        Err(_) => return Err("invalid subdomain"),
        Ok(Some(owner)) if owner != token_id => return Err("unauthorized"),
        Ok(Some(_)) => return Ok(desired),
        Ok(None) => {}
    }

    if store.reserve_subdomain(token_id, &desired).await.is_err() {
        // Lost a reservation race; re-check ownership.
        return match store.reserved_subdomain_token_id(&desired).await {
            Ok(Some(owner)) if owner == token_id => Ok(desired),
            Ok(Some(_)) => Err("unauthorized"),
            _ => Err("failed to reserve subdomain"),
        };
    }

    Ok(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn test_resolve_random_id_without_names() {
        let state = test_state(None).await;
        let request = HttpTunnelRequest::default();
        let id = resolve_tunnel_id(&state, &request, 0).await.unwrap();
        assert_eq!(id.len(), 8);
    }

    #[tokio::test]
    async fn test_resolve_rejects_both_names() {
        let state = test_state(None).await;
        let request = HttpTunnelRequest {
            subdomain: "a".into(),
            domain: "b.tunnel.eosrift.test".into(),
            ..Default::default()
        };
        assert_eq!(
            resolve_tunnel_id(&state, &request, 1).await,
            Err("invalid request")
        );
    }

    #[tokio::test]
    async fn test_resolve_subdomain_requires_identity() {
        let store = Store::open(":memory:").await.unwrap();
        let state = test_state(Some(store)).await;

        let request = HttpTunnelRequest {
            subdomain: "demo".into(),
            ..Default::default()
        };
        assert_eq!(
            resolve_tunnel_id(&state, &request, 0).await,
            Err("unauthorized")
        );
    }

    #[tokio::test]
    async fn test_resolve_auto_reserves_and_enforces_ownership() {
        let store = Store::open(":memory:").await.unwrap();
        let (owner, _) = store.create_token("owner").await.unwrap();
        let (other, _) = store.create_token("other").await.unwrap();
        let state = test_state(Some(store)).await;

        let request = HttpTunnelRequest {
            subdomain: "demo".into(),
            ..Default::default()
        };

        // First use reserves.
        assert_eq!(
            resolve_tunnel_id(&state, &request, owner.id).await,
            Ok("demo".to_string())
        );
        // Owner can reclaim.
        assert_eq!(
            resolve_tunnel_id(&state, &request, owner.id).await,
            Ok("demo".to_string())
        );
        // Anyone else is refused.
        assert_eq!(
            resolve_tunnel_id(&state, &request, other.id).await,
            Err("unauthorized")
        );
    }

    #[tokio::test]
    async fn test_resolve_domain_must_sit_under_tunnel_domain() {
        let store = Store::open(":memory:").await.unwrap();
        let (owner, _) = store.create_token("owner").await.unwrap();
        let state = test_state(Some(store)).await;

        let ok = HttpTunnelRequest {
            domain: "https://demo.tunnel.eosrift.test".into(),
            ..Default::default()
        };
        assert_eq!(
            resolve_tunnel_id(&state, &ok, owner.id).await,
            Ok("demo".to_string())
        );

        let wrong = HttpTunnelRequest {
            domain: "demo.elsewhere.test".into(),
            ..Default::default()
        };
        assert_eq!(
            resolve_tunnel_id(&state, &wrong, owner.id).await,
            Err("invalid domain")
        );

        let nested = HttpTunnelRequest {
            domain: "a.b.tunnel.eosrift.test".into(),
            ..Default::default()
        };
        assert_eq!(
            resolve_tunnel_id(&state, &nested, owner.id).await,
            Err("invalid domain")
        );
    }

    #[tokio::test]
    async fn test_claim_tcp_port_ownership() {
        let store = Store::open(":memory:").await.unwrap();
        let (owner, _) = store.create_token("owner").await.unwrap();
        let (other, _) = store.create_token("other").await.unwrap();

        claim_tcp_port(&store, 25000, owner.id).await.unwrap();
        claim_tcp_port(&store, 25000, owner.id).await.unwrap();
        assert_eq!(
            claim_tcp_port(&store, 25000, other.id).await,
            Err("unauthorized")
        );
    }
}
