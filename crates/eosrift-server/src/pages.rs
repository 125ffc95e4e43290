//! Static surfaces: landing page, embedded docs, admin UI assets, and the
//! ACME on-demand authorization endpoint
//!
//! The documentation under `/docs/` is the static output of the docs
//! generator, embedded at build time. The generator itself (its config,
//! nav/sidebar, rendering) lives outside this repository; the server only
//! ships the rendered site. Links are generated with clean URLs, so
//! extensionless paths resolve to their `.html` files here.

use crate::host::{is_base_domain_host, normalize_domain, tunnel_id_from_host};
use crate::SharedState;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;
use std::collections::HashMap;

#[derive(RustEmbed)]
#[folder = "assets/landing"]
struct LandingAssets;

#[derive(RustEmbed)]
#[folder = "assets/admin"]
struct AdminAssets;

#[derive(RustEmbed)]
#[folder = "assets/docs"]
struct DocsAssets;

fn embedded_response<A: RustEmbed>(path: &str) -> Option<Response> {
    let asset = A::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Some(
        (
            [(header::CONTENT_TYPE, mime.as_ref().to_string())],
            Body::from(asset.data.into_owned()),
        )
            .into_response(),
    )
}

pub fn landing_index() -> Response {
    embedded_response::<LandingAssets>("index.html")
        .unwrap_or_else(|| StatusCode::NOT_FOUND.into_response())
}

pub fn landing_style() -> Response {
    embedded_response::<LandingAssets>("style.css")
        .unwrap_or_else(|| StatusCode::NOT_FOUND.into_response())
}

pub fn admin_asset(path: &str) -> Response {
    let file = match path {
        "" | "/" => "index.html",
        "style.css" => "style.css",
        "app.js" => "app.js",
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    embedded_response::<AdminAssets>(file)
        .unwrap_or_else(|| StatusCode::NOT_FOUND.into_response())
}

/// Serve the embedded documentation site. `rel` is the path after
/// `/docs/`. Clean URLs resolve `guide` to `guide.html`; directories
/// resolve to their `index.html`; anything unknown falls back to the docs
/// index.
pub fn docs(rel: &str) -> Response {
    for candidate in docs_path_candidates(rel) {
        if let Some(response) = embedded_response::<DocsAssets>(&candidate) {
            return response;
        }
    }

    embedded_response::<DocsAssets>("index.html")
        .unwrap_or_else(|| StatusCode::NOT_FOUND.into_response())
}

fn docs_path_candidates(rel: &str) -> Vec<String> {
    let rel = rel.trim_start_matches('/');

    // No traversal into the embedded tree.
    if rel.split('/').any(|seg| seg == "..") {
        return Vec::new();
    }

    if rel.is_empty() {
        return vec!["index.html".to_string()];
    }

    let mut candidates = vec![rel.to_string()];
    if rel.ends_with('/') {
        candidates = vec![format!("{rel}index.html")];
    } else if !rel.rsplit('/').next().unwrap_or(rel).contains('.') {
        candidates.push(format!("{rel}.html"));
        candidates.push(format!("{rel}/index.html"));
    }
    candidates
}

/// ACME on-demand authorization for the fronting proxy: issuance is only
/// approved for the apex domains, active tunnels, and reserved
/// subdomains, so third parties cannot force certificates for arbitrary
/// names under the tunnel domain.
pub async fn caddy_ask(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let domain = params
        .get("domain")
        .map(String::as_str)
        .filter(|d| !d.trim().is_empty())
        .or_else(|| params.get("host").map(String::as_str))
        .map(normalize_domain)
        .unwrap_or_default();
    if domain.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing domain\n").into_response();
    }

    let base = normalize_domain(&state.config.base_domain);
    let tunnel = normalize_domain(&state.config.tunnel_domain);
    if base.is_empty() && tunnel.is_empty() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "server misconfigured\n").into_response();
    }

    if (!base.is_empty() && domain == base) || (!tunnel.is_empty() && domain == tunnel) {
        return StatusCode::OK.into_response();
    }

    if let Some(id) = tunnel_id_from_host(&domain, &state.config.tunnel_domain) {
        if state.registry.get_http_tunnel(&id).is_some() {
            return StatusCode::OK.into_response();
        }
        if let Some(store) = &state.store {
            if let Ok(Some(_)) = store.reserved_subdomain_token_id(&id).await {
                return StatusCode::OK.into_response();
            }
        }
    }

    (StatusCode::FORBIDDEN, "forbidden\n").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docs_candidates_clean_urls() {
        assert_eq!(docs_path_candidates(""), vec!["index.html"]);
        assert_eq!(
            docs_path_candidates("getting-started"),
            vec![
                "getting-started",
                "getting-started.html",
                "getting-started/index.html"
            ]
        );
        assert_eq!(docs_path_candidates("style.css"), vec!["style.css"]);
        assert_eq!(docs_path_candidates("guide/"), vec!["guide/index.html"]);
        assert!(docs_path_candidates("../secrets").is_empty());
    }

    #[test]
    fn test_docs_serves_embedded_pages() {
        let response = docs("");
        assert_eq!(response.status(), StatusCode::OK);

        // Clean URL resolution for a known page.
        let response = docs("getting-started");
        assert_eq!(response.status(), StatusCode::OK);

        // Unknown paths fall back to the index rather than escaping.
        let response = docs("no-such-page");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_admin_assets_are_scoped() {
        assert_eq!(admin_asset("").status(), StatusCode::OK);
        assert_eq!(admin_asset("style.css").status(), StatusCode::OK);
        assert_eq!(admin_asset("app.js").status(), StatusCode::OK);
        assert_eq!(admin_asset("secret.txt").status(), StatusCode::NOT_FOUND);
    }
}
