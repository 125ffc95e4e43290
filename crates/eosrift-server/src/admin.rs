//! Admin API and UI
//!
//! Mounted only when an admin token is configured and a store is open.
//! The UI is a small embedded single-page app; the API is bearer-guarded
//! JSON over the store. Everything is scoped to the base domain so tunnel
//! subdomains can never shadow it.

use crate::host::{constant_time_eq, is_base_domain_host, request_host};
use crate::SharedState;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{self, HeaderValue};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use eosrift_auth::Store;
use serde::Deserialize;
use serde_json::json;

const MAX_ADMIN_BODY_BYTES: usize = 64 * 1024;

pub fn api_router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/summary", get(summary))
        .route("/tokens", get(list_tokens).post(create_token))
        .route("/tokens/{id}", delete(revoke_token))
        .route("/subdomains", get(list_subdomains).post(reserve_subdomain))
        .route("/subdomains/{subdomain}", delete(unreserve_subdomain))
        .route("/tcp-ports", get(list_tcp_ports).post(reserve_tcp_port))
        .route("/tcp-ports/{port}", delete(unreserve_tcp_port))
        .layer(DefaultBodyLimit::max(MAX_ADMIN_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state, require_admin_auth))
}

/// Bearer auth plus base-domain scoping for every admin API request.
async fn require_admin_auth(
    State(state): State<SharedState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_base_domain_host(&request_host(&request), &state.config.base_domain) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let token = state.config.admin_token.trim();
    if token.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let value = value.trim();
            if value.len() >= 7 && value[..7].eq_ignore_ascii_case("bearer ") {
                Some(value[7..].trim())
            } else {
                None
            }
        });

    match presented {
        Some(presented) if constant_time_eq(presented.as_bytes(), token.as_bytes()) => {
            next.run(request).await
        }
        _ => {
            let mut response =
                (StatusCode::UNAUTHORIZED, "unauthorized\n").into_response();
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Bearer realm="EosRift Admin""#),
            );
            response
        }
    }
}

fn store_of(state: &SharedState) -> Result<&Store, Response> {
    state
        .store
        .as_ref()
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())
}

fn admin_error(status: StatusCode, message: impl AsRef<str>) -> Response {
    (status, Json(json!({ "error": message.as_ref() }))).into_response()
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

async fn summary(State(state): State<SharedState>) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    let tokens = match store.list_tokens().await {
        Ok(tokens) => tokens,
        Err(_) => return admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list tokens"),
    };
    let subdomains = match store.list_reserved_subdomains().await {
        Ok(items) => items,
        Err(_) => {
            return admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list subdomains")
        }
    };
    let ports = match store.list_reserved_tcp_ports().await {
        Ok(items) => items,
        Err(_) => {
            return admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list tcp ports")
        }
    };

    let active = tokens.iter().filter(|t| t.revoked_at.is_none()).count();
    let revoked = tokens.len() - active;

    Json(json!({
        "active_tokens": active,
        "revoked_tokens": revoked,
        "reserved_subdomain": subdomains.len(),
        "reserved_tcp_ports": ports.len(),
        "active_http_tunnels": state.registry.active_http_tunnels(),
        "time": rfc3339(Utc::now()),
    }))
    .into_response()
}

async fn list_tokens(State(state): State<SharedState>) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    match store.list_tokens().await {
        Ok(records) => {
            let items: Vec<_> = records
                .into_iter()
                .map(|rec| {
                    json!({
                        "id": rec.id,
                        "label": rec.label,
                        "prefix": rec.prefix,
                        "status": if rec.revoked_at.is_none() { "active" } else { "revoked" },
                        "created_at": rfc3339(rec.created_at),
                        "revoked_at": rec.revoked_at.map(rfc3339),
                    })
                })
                .collect();
            Json(json!({ "tokens": items })).into_response()
        }
        Err(_) => admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list tokens"),
    }
}

#[derive(Deserialize)]
struct CreateTokenRequest {
    #[serde(default)]
    label: String,
}

async fn create_token(
    State(state): State<SharedState>,
    body: Result<Json<CreateTokenRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };
    let Ok(Json(request)) = body else {
        return admin_error(StatusCode::BAD_REQUEST, "invalid request body");
    };

    match store.create_token(request.label.trim()).await {
        Ok((rec, plain)) => (
            StatusCode::CREATED,
            Json(json!({
                "id": rec.id,
                "label": rec.label,
                "prefix": rec.prefix,
                "created_at": rfc3339(rec.created_at),
                "token": plain,
            })),
        )
            .into_response(),
        Err(_) => admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create token"),
    }
}

async fn revoke_token(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    let id = match id.trim().parse::<i64>() {
        Ok(id) if id > 0 => id,
        _ => return admin_error(StatusCode::BAD_REQUEST, "invalid token id"),
    };

    match store.revoke_token(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to revoke token"),
    }
}

async fn list_subdomains(State(state): State<SharedState>) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    match store.list_reserved_subdomains().await {
        Ok(records) => {
            let items: Vec<_> = records
                .into_iter()
                .map(|rec| {
                    json!({
                        "subdomain": rec.subdomain,
                        "token_id": rec.token_id,
                        "token_prefix": rec.token_prefix,
                        "created_at": rfc3339(rec.created_at),
                    })
                })
                .collect();
            Json(json!({ "subdomains": items })).into_response()
        }
        Err(_) => admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list subdomains"),
    }
}

#[derive(Deserialize)]
struct ReserveSubdomainRequest {
    #[serde(default)]
    token_id: i64,
    #[serde(default)]
    subdomain: String,
}

async fn reserve_subdomain(
    State(state): State<SharedState>,
    body: Result<Json<ReserveSubdomainRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };
    let Ok(Json(request)) = body else {
        return admin_error(StatusCode::BAD_REQUEST, "invalid request body");
    };

    let subdomain = request.subdomain.trim().to_string();
    if request.token_id <= 0 || subdomain.is_empty() {
        return admin_error(
            StatusCode::BAD_REQUEST,
            "token_id and subdomain are required",
        );
    }

    match store.reserve_subdomain(request.token_id, &subdomain).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({ "subdomain": subdomain, "token_id": request.token_id })),
        )
            .into_response(),
        Err(err) => admin_error(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

async fn unreserve_subdomain(
    State(state): State<SharedState>,
    Path(subdomain): Path<String>,
) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    let subdomain = subdomain.trim();
    if subdomain.is_empty() {
        return admin_error(StatusCode::BAD_REQUEST, "invalid subdomain");
    }

    match store.unreserve_subdomain(subdomain).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => admin_error(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

async fn list_tcp_ports(State(state): State<SharedState>) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    match store.list_reserved_tcp_ports().await {
        Ok(records) => {
            let items: Vec<_> = records
                .into_iter()
                .map(|rec| {
                    json!({
                        "port": rec.port,
                        "token_id": rec.token_id,
                        "token_prefix": rec.token_prefix,
                        "created_at": rfc3339(rec.created_at),
                    })
                })
                .collect();
            Json(json!({ "tcp_ports": items })).into_response()
        }
        Err(_) => admin_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list tcp ports"),
    }
}

#[derive(Deserialize)]
struct ReserveTcpPortRequest {
    #[serde(default)]
    token_id: i64,
    #[serde(default)]
    port: u16,
}

async fn reserve_tcp_port(
    State(state): State<SharedState>,
    body: Result<Json<ReserveTcpPortRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };
    let Ok(Json(request)) = body else {
        return admin_error(StatusCode::BAD_REQUEST, "invalid request body");
    };

    if request.token_id <= 0 || request.port == 0 {
        return admin_error(StatusCode::BAD_REQUEST, "token_id and port are required");
    }

    match store.reserve_tcp_port(request.token_id, request.port).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({ "port": request.port, "token_id": request.token_id })),
        )
            .into_response(),
        Err(err) => admin_error(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

async fn unreserve_tcp_port(State(state): State<SharedState>, Path(port): Path<String>) -> Response {
    let store = match store_of(&state) {
        Ok(store) => store,
        Err(response) => return response,
    };

    let port = match port.trim().parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => return admin_error(StatusCode::BAD_REQUEST, "invalid port"),
    };

    match store.unreserve_tcp_port(port).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => admin_error(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state_with_admin;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn request_with_auth(
        app: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "eosrift.test");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(value) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }

    async fn admin_app() -> Router {
        let state = test_state_with_admin("admin-secret").await;
        Router::new()
            .nest("/api/admin", api_router(state.clone()))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = admin_app().await;

        let (status, _) = request_with_auth(app.clone(), "GET", "/api/admin/summary", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            request_with_auth(app.clone(), "GET", "/api/admin/summary", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            request_with_auth(app, "GET", "/api/admin/summary", Some("admin-secret"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_tokens"], 0);
    }

    #[tokio::test]
    async fn test_token_lifecycle_via_api() {
        let app = admin_app().await;

        let (status, created) = request_with_auth(
            app.clone(),
            "POST",
            "/api/admin/tokens",
            Some("admin-secret"),
            Some(json!({ "label": "ci" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["label"], "ci");
        assert!(created["token"].as_str().unwrap().starts_with("eos_"));

        let (status, listed) = request_with_auth(
            app.clone(),
            "GET",
            "/api/admin/tokens",
            Some("admin-secret"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["tokens"][0]["status"], "active");

        let id = created["id"].as_i64().unwrap();
        let (status, _) = request_with_auth(
            app.clone(),
            "DELETE",
            &format!("/api/admin/tokens/{id}"),
            Some("admin-secret"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, listed) = request_with_auth(
            app,
            "GET",
            "/api/admin/tokens",
            Some("admin-secret"),
            None,
        )
        .await;
        assert_eq!(listed["tokens"][0]["status"], "revoked");
    }

    #[tokio::test]
    async fn test_subdomain_reservation_via_api() {
        let app = admin_app().await;

        let (_, created) = request_with_auth(
            app.clone(),
            "POST",
            "/api/admin/tokens",
            Some("admin-secret"),
            Some(json!({ "label": "owner" })),
        )
        .await;
        let token_id = created["id"].as_i64().unwrap();

        let (status, _) = request_with_auth(
            app.clone(),
            "POST",
            "/api/admin/subdomains",
            Some("admin-secret"),
            Some(json!({ "token_id": token_id, "subdomain": "demo" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        // Duplicate reservation reports the conflict.
        let (status, body) = request_with_auth(
            app.clone(),
            "POST",
            "/api/admin/subdomains",
            Some("admin-secret"),
            Some(json!({ "token_id": token_id, "subdomain": "demo" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "already reserved");

        let (status, _) = request_with_auth(
            app,
            "DELETE",
            "/api/admin/subdomains/demo",
            Some("admin-secret"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_admin_hidden_off_base_domain() {
        let state = test_state_with_admin("admin-secret").await;
        let app: Router = Router::new()
            .nest("/api/admin", api_router(state.clone()))
            .with_state(state);

        let request = Request::builder()
            .method("GET")
            .uri("/api/admin/summary")
            .header(header::HOST, "demo.tunnel.eosrift.test")
            .header(header::AUTHORIZATION, "Bearer admin-secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
