//! eosrift-deployhook binary
//!
//! Runs the webhook receiver with a shell-command trigger: a matched
//! workflow run executes the configured deploy script.

use anyhow::{Context, Result};
use async_trait::async_trait;
use eosrift_deployhook::{router, DeployHookConfig, DeployTrigger, HookError, Run};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct CommandTrigger {
    command: String,
    args: Vec<String>,
}

#[async_trait]
impl DeployTrigger for CommandTrigger {
    async fn deploy(&self, run: Run) -> Result<(), HookError> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .output()
            .await
            .map_err(|err| HookError::DeployFailed(err.to_string()))?;

        let log_text = String::from_utf8_lossy(&output.stdout).trim().to_string()
            + String::from_utf8_lossy(&output.stderr).trim();
        if !log_text.is_empty() {
            info!(run_id = run.run_id, "deploy output:\n{log_text}");
        }

        if !output.status.success() {
            return Err(HookError::DeployFailed(format!(
                "deploy command exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("EOSRIFT_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let secret = getenv("EOSRIFT_DEPLOY_WEBHOOK_SECRET", "");
    if secret.is_empty() {
        anyhow::bail!("EOSRIFT_DEPLOY_WEBHOOK_SECRET is required");
    }

    let listen_addr = getenv("EOSRIFT_DEPLOY_WEBHOOK_LISTEN_ADDR", "0.0.0.0:8091");
    let config = DeployHookConfig {
        secret,
        workflow_name: getenv("EOSRIFT_DEPLOY_WEBHOOK_WORKFLOW", "Docker Image"),
        branch: getenv("EOSRIFT_DEPLOY_WEBHOOK_BRANCH", "main"),
        repository: getenv("EOSRIFT_DEPLOY_WEBHOOK_REPOSITORY", ""),
        timeout: parse_timeout(
            &getenv("EOSRIFT_DEPLOY_TIMEOUT", "10m"),
            Duration::from_secs(10 * 60),
        ),
    };

    let trigger = Arc::new(CommandTrigger {
        command: getenv(
            "EOSRIFT_DEPLOY_COMMAND",
            "/workspace/deploy/webhook/eosrift-deploy.sh",
        ),
        args: std::env::var("EOSRIFT_DEPLOY_COMMAND_ARGS")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    });

    info!(
        addr = %listen_addr,
        workflow = %config.workflow_name,
        branch = %config.branch,
        repo = %config.repository,
        "listening"
    );

    let app = router(config, trigger).context("init handler")?;
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("bind {listen_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn getenv(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn parse_timeout(value: &str, fallback: Duration) -> Duration {
    match humantime::parse_duration(value.trim()) {
        Ok(duration) if duration > Duration::ZERO => duration,
        _ => fallback,
    }
}
