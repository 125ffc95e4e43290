//! Eosrift edge server
//!
//! One axum app serves everything: the control WebSocket clients dial, the
//! public HTTP tunnel proxy (host-routed fallback), the landing page and
//! embedded docs on the base domain, the admin surface, metrics, and the
//! ACME authorization hook for the fronting proxy.

pub mod admin;
pub mod config;
pub mod control;
pub mod host;
pub mod limits;
pub mod metrics;
pub mod pages;
pub mod proxy;
pub mod rate_limit;
pub mod registry;
pub mod ws;

pub use config::ServerConfig;
pub use limits::{TunnelLimiter, TunnelPermit};
pub use metrics::ServerMetrics;
pub use rate_limit::RateLimiter;
pub use registry::{HttpTunnelEntry, TunnelPolicy, TunnelRegistry};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use host::{constant_time_eq, is_base_domain_host, request_host};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0} is required")]
    MissingConfig(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Option<eosrift_auth::Store>,
    pub registry: TunnelRegistry,
    pub limiter: TunnelLimiter,
    pub rate_limiter: RateLimiter,
    pub metrics: Arc<ServerMetrics>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: ServerConfig, store: Option<eosrift_auth::Store>) -> SharedState {
        Arc::new(Self {
            config,
            store,
            registry: TunnelRegistry::new(),
            limiter: TunnelLimiter::new(),
            rate_limiter: RateLimiter::new(),
            metrics: ServerMetrics::install(),
        })
    }
}

/// Assemble the full router for the given state.
pub fn build_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/caddy/ask", get(pages::caddy_ask))
        .route("/control", get(control::control_handler));

    if !state.config.metrics_token.is_empty() {
        router = router.route("/metrics", get(metrics_route));
    }

    if !state.config.admin_token.trim().is_empty() && state.store.is_some() {
        router = router
            .route("/admin", get(admin_index))
            .route("/admin/{*asset}", get(admin_assets))
            .nest("/api/admin", admin::api_router(state.clone()));
    }

    router
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the app with graceful shutdown until the process is signalled.
pub async fn run(state: SharedState) -> Result<(), ServerError> {
    let addr = state.config.listen_addr.clone();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

async fn healthz() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "ok\n",
    )
        .into_response()
}

/// Everything without a dedicated route: base-domain pages first, then
/// the tunnel proxy.
async fn dispatch(State(state): State<SharedState>, request: Request<Body>) -> Response {
    let host = request_host(&request);

    if is_base_domain_host(&host, &state.config.base_domain) {
        let path = request.uri().path().to_string();
        match path.as_str() {
            "/" => return pages::landing_index(),
            "/style.css" => return pages::landing_style(),
            "/docs" => return pages::docs(""),
            _ => {
                if let Some(rel) = path.strip_prefix("/docs/") {
                    return pages::docs(rel);
                }
            }
        }
    }

    proxy::proxy_request(state, request).await.into_response()
}

async fn admin_index(State(state): State<SharedState>, request: Request<Body>) -> Response {
    if !is_base_domain_host(&request_host(&request), &state.config.base_domain) {
        return StatusCode::NOT_FOUND.into_response();
    }
    pages::admin_asset("")
}

async fn admin_assets(
    State(state): State<SharedState>,
    axum::extract::Path(asset): axum::extract::Path<String>,
    request: Request<Body>,
) -> Response {
    if !is_base_domain_host(&request_host(&request), &state.config.base_domain) {
        return StatusCode::NOT_FOUND.into_response();
    }
    pages::admin_asset(&asset)
}

/// Token-gated Prometheus exposition. Wrong or missing credentials get a
/// 404 so the endpoint does not advertise itself.
async fn metrics_route(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    request: Request<Body>,
) -> Response {
    let token = state.config.metrics_token.trim();
    if token.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("Bearer "))
        .map(str::trim);

    let authorized = bearer
        .map(|presented| constant_time_eq(presented.as_bytes(), token.as_bytes()))
        .unwrap_or(false)
        || params
            .get("token")
            .map(|presented| constant_time_eq(presented.trim().as_bytes(), token.as_bytes()))
            .unwrap_or(false);

    if !authorized {
        return StatusCode::NOT_FOUND.into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
        .into_response()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use eosrift_auth::Store;

    pub(crate) fn test_config() -> ServerConfig {
        ServerConfig {
            base_domain: "eosrift.test".into(),
            tunnel_domain: "tunnel.eosrift.test".into(),
            ..Default::default()
        }
    }

    pub(crate) async fn test_state(store: Option<Store>) -> SharedState {
        AppState::new(test_config(), store)
    }

    pub(crate) async fn test_state_with_admin(admin_token: &str) -> SharedState {
        let mut config = test_config();
        config.admin_token = admin_token.into();
        let store = Store::open(":memory:").await.unwrap();
        AppState::new(config, Some(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, test_state};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_response(app: Router, host: &str, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = build_router(test_state(None).await);
        let (status, body) = get_response(app, "anything.test", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok\n");
    }

    #[tokio::test]
    async fn test_landing_only_on_base_domain() {
        let app = build_router(test_state(None).await);

        let (status, body) = get_response(app.clone(), "eosrift.test", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Eosrift"));

        // Unknown tunnel host falls through to the proxy and 404s.
        let (status, _) = get_response(app, "nope.tunnel.eosrift.test", "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_docs_clean_urls() {
        let app = build_router(test_state(None).await);

        let (status, body) = get_response(app.clone(), "eosrift.test", "/docs/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<html"));

        let (status, _) = get_response(app, "eosrift.test", "/docs/getting-started").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_route_absent_without_token() {
        let app = build_router(test_state(None).await);
        let (status, _) = get_response(app, "eosrift.test", "/metrics").await;
        // No route at all; the fallback proxy answers.
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_route_requires_token() {
        let mut config = test_config();
        config.metrics_token = "metrics-secret".into();
        let app = build_router(AppState::new(config, None));

        let (status, _) = get_response(app.clone(), "eosrift.test", "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            get_response(app.clone(), "eosrift.test", "/metrics?token=wrong").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            get_response(app, "eosrift.test", "/metrics?token=metrics-secret").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_caddy_ask() {
        let app = build_router(test_state(None).await);

        let (status, _) = get_response(app.clone(), "eosrift.test", "/caddy/ask").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            get_response(app.clone(), "eosrift.test", "/caddy/ask?domain=eosrift.test").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get_response(
            app.clone(),
            "eosrift.test",
            "/caddy/ask?domain=tunnel.eosrift.test",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Random hostnames under the tunnel domain are refused.
        let (status, _) = get_response(
            app,
            "eosrift.test",
            "/caddy/ask?domain=random.tunnel.eosrift.test",
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_routes_absent_without_token() {
        let app = build_router(test_state(None).await);
        let (status, _) = get_response(app, "eosrift.test", "/admin").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
