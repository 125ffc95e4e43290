//! Webhook handling

use crate::HookError;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const MAX_PAYLOAD_BYTES: usize = 1 << 20;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct DeployHookConfig {
    pub secret: String,

    /// Workflow name that must have completed.
    pub workflow_name: String,

    /// Branch the workflow must have run on.
    pub branch: String,

    /// Optional `owner/repo` filter; empty accepts any repository.
    pub repository: String,

    /// Deploy command timeout.
    pub timeout: Duration,
}

impl Default for DeployHookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            workflow_name: "Docker Image".to_string(),
            branch: "main".to_string(),
            repository: String::new(),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// A matched workflow run worth deploying.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub repository: String,
    pub workflow: String,
    pub branch: String,
    pub conclusion: String,
    pub sha: String,
    pub url: String,
    pub run_id: i64,
}

/// Performs the actual deploy. Wired in by the binary.
#[async_trait]
pub trait DeployTrigger: Send + Sync {
    async fn deploy(&self, run: Run) -> Result<(), HookError>;
}

struct HookState {
    config: DeployHookConfig,
    trigger: Arc<dyn DeployTrigger>,
    running: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunEvent {
    #[serde(default)]
    action: String,
    #[serde(default)]
    repository: EventRepository,
    #[serde(default)]
    workflow_run: EventWorkflowRun,
}

#[derive(Debug, Default, Deserialize)]
struct EventRepository {
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct EventWorkflowRun {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    head_branch: String,
    #[serde(default)]
    head_sha: String,
    #[serde(default)]
    html_url: String,
}

/// Build the webhook router.
pub fn router(
    config: DeployHookConfig,
    trigger: Arc<dyn DeployTrigger>,
) -> Result<Router, HookError> {
    if config.secret.trim().is_empty() {
        return Err(HookError::MissingSecret);
    }

    let state = Arc::new(HookState {
        config,
        trigger,
        running: AtomicBool::new(false),
    });

    Ok(Router::new()
        .route("/", post(handle_webhook))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state))
}

async fn handle_webhook(
    State(state): State<Arc<HookState>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim();
    if !verify_signature(state.config.secret.as_bytes(), &payload, signature) {
        return (StatusCode::UNAUTHORIZED, "invalid signature\n").into_response();
    }

    let event = headers
        .get("x-github-event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim();
    if event == "ping" || event != "workflow_run" {
        return StatusCode::NO_CONTENT.into_response();
    }

    let parsed: WorkflowRunEvent = match serde_json::from_slice(&payload) {
        Ok(parsed) => parsed,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid json\n").into_response(),
    };

    let run = match match_event(&state.config, parsed) {
        Ok(run) => run,
        Err(reason) => {
            info!(reason, "deploy webhook ignored");
            return (StatusCode::ACCEPTED, "ignored\n").into_response();
        }
    };

    if state
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        info!(run_id = run.run_id, "deploy webhook ignored: already running");
        return (StatusCode::ACCEPTED, "deploy already running\n").into_response();
    }

    tokio::spawn(run_trigger(Arc::clone(&state), run));

    (StatusCode::ACCEPTED, "accepted\n").into_response()
}

async fn run_trigger(state: Arc<HookState>, run: Run) {
    info!(
        repo = %run.repository,
        workflow = %run.workflow,
        branch = %run.branch,
        sha = %run.sha,
        run_id = run.run_id,
        "deploy start"
    );

    let result = tokio::time::timeout(state.config.timeout, state.trigger.deploy(run.clone())).await;
    state.running.store(false, Ordering::SeqCst);

    match result {
        Ok(Ok(())) => info!(run_id = run.run_id, "deploy complete"),
        Ok(Err(err)) => warn!(run_id = run.run_id, "deploy failed: {err}"),
        Err(_) => warn!(run_id = run.run_id, "deploy failed: {}", HookError::DeployTimeout),
    }
}

fn match_event(
    config: &DeployHookConfig,
    event: WorkflowRunEvent,
) -> Result<Run, &'static str> {
    if event.action != "completed" {
        return Err("action is not completed");
    }
    if event.workflow_run.name != config.workflow_name {
        return Err("workflow name mismatch");
    }
    if event.workflow_run.conclusion.as_deref() != Some("success") {
        return Err("workflow did not succeed");
    }
    if event.workflow_run.head_branch != config.branch {
        return Err("branch mismatch");
    }

    let repository = event.repository.full_name.trim().to_string();
    if !config.repository.is_empty() && repository != config.repository {
        return Err("repository mismatch");
    }

    Ok(Run {
        repository,
        workflow: event.workflow_run.name,
        branch: event.workflow_run.head_branch,
        conclusion: "success".to_string(),
        sha: event.workflow_run.head_sha,
        url: event.workflow_run.html_url,
        run_id: event.workflow_run.id,
    })
}

/// Verify `sha256=<hex>` over the raw payload.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn sign(secret: &[u8], payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    struct RecordingTrigger {
        runs: tokio::sync::Mutex<Vec<Run>>,
    }

    #[async_trait]
    impl DeployTrigger for RecordingTrigger {
        async fn deploy(&self, run: Run) -> Result<(), HookError> {
            self.runs.lock().await.push(run);
            Ok(())
        }
    }

    fn event_payload(action: &str, name: &str, conclusion: &str, branch: &str) -> Vec<u8> {
        serde_json::json!({
            "action": action,
            "repository": { "full_name": "eosrift/eosrift" },
            "workflow_run": {
                "id": 42,
                "name": name,
                "conclusion": conclusion,
                "head_branch": branch,
                "head_sha": "abc123",
                "html_url": "https://example.com/run/42",
            },
        })
        .to_string()
        .into_bytes()
    }

    fn test_app(trigger: Arc<dyn DeployTrigger>) -> Router {
        router(
            DeployHookConfig {
                secret: "hook-secret".to_string(),
                ..Default::default()
            },
            trigger,
        )
        .unwrap()
    }

    async fn post_event(
        app: Router,
        payload: &[u8],
        signature: Option<&str>,
        event: &str,
    ) -> StatusCode {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/")
            .header("x-github-event", event);
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature-256", signature);
        }
        let request = builder.body(Body::from(payload.to_vec())).unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[test]
    fn test_signature_verification() {
        let payload = b"payload";
        let good = sign(b"secret", payload);

        assert!(verify_signature(b"secret", payload, &good));
        assert!(!verify_signature(b"other", payload, &good));
        assert!(!verify_signature(b"secret", b"tampered", &good));
        assert!(!verify_signature(b"secret", payload, "sha256=nothex"));
        assert!(!verify_signature(b"secret", payload, "sha1=whatever"));
        assert!(!verify_signature(b"", payload, &good));
    }

    #[test]
    fn test_match_event_filters() {
        let config = DeployHookConfig {
            secret: "s".into(),
            ..Default::default()
        };

        let parse = |action: &str, name: &str, conclusion: &str, branch: &str| {
            serde_json::from_slice::<WorkflowRunEvent>(&event_payload(
                action, name, conclusion, branch,
            ))
            .unwrap()
        };

        let run = match_event(&config, parse("completed", "Docker Image", "success", "main"))
            .unwrap();
        assert_eq!(run.run_id, 42);
        assert_eq!(run.repository, "eosrift/eosrift");

        assert!(match_event(&config, parse("requested", "Docker Image", "success", "main")).is_err());
        assert!(match_event(&config, parse("completed", "Other", "success", "main")).is_err());
        assert!(match_event(&config, parse("completed", "Docker Image", "failure", "main")).is_err());
        assert!(match_event(&config, parse("completed", "Docker Image", "success", "dev")).is_err());

        let scoped = DeployHookConfig {
            secret: "s".into(),
            repository: "someone/else".into(),
            ..Default::default()
        };
        assert!(match_event(&scoped, parse("completed", "Docker Image", "success", "main")).is_err());
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let trigger = Arc::new(RecordingTrigger {
            runs: tokio::sync::Mutex::new(Vec::new()),
        });
        let app = test_app(trigger);

        let payload = event_payload("completed", "Docker Image", "success", "main");
        let status = post_event(app, &payload, Some("sha256=deadbeef"), "workflow_run").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ping_is_acknowledged() {
        let trigger = Arc::new(RecordingTrigger {
            runs: tokio::sync::Mutex::new(Vec::new()),
        });
        let app = test_app(trigger);

        let payload = b"{}".to_vec();
        let signature = sign(b"hook-secret", &payload);
        let status = post_event(app, &payload, Some(&signature), "ping").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_matching_run_triggers_deploy() {
        let trigger = Arc::new(RecordingTrigger {
            runs: tokio::sync::Mutex::new(Vec::new()),
        });
        let app = test_app(trigger.clone());

        let payload = event_payload("completed", "Docker Image", "success", "main");
        let signature = sign(b"hook-secret", &payload);
        let status = post_event(app, &payload, Some(&signature), "workflow_run").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // The trigger runs in a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let runs = trigger.runs.lock().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].sha, "abc123");
    }

    #[tokio::test]
    async fn test_non_matching_run_is_ignored() {
        let trigger = Arc::new(RecordingTrigger {
            runs: tokio::sync::Mutex::new(Vec::new()),
        });
        let app = test_app(trigger.clone());

        let payload = event_payload("completed", "Docker Image", "failure", "main");
        let signature = sign(b"hook-secret", &payload);
        let status = post_event(app, &payload, Some(&signature), "workflow_run").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(trigger.runs.lock().await.is_empty());
    }

    #[test]
    fn test_router_requires_secret() {
        let trigger = Arc::new(RecordingTrigger {
            runs: tokio::sync::Mutex::new(Vec::new()),
        });
        assert!(router(DeployHookConfig::default(), trigger).is_err());
    }
}
