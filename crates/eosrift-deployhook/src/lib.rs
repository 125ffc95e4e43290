//! Deploy webhook receiver
//!
//! Listens for GitHub `workflow_run` webhooks and triggers a deploy when
//! the right workflow succeeds on the right branch. Signatures are
//! verified (HMAC-SHA256 over the raw body) before anything is parsed,
//! and only one deploy runs at a time.

pub mod handler;

pub use handler::{router, DeployHookConfig, DeployTrigger, Run};

use thiserror::Error;

/// Webhook errors
#[derive(Debug, Error)]
pub enum HookError {
    #[error("secret is required")]
    MissingSecret,

    #[error("deploy command timed out")]
    DeployTimeout,

    #[error("deploy failed: {0}")]
    DeployFailed(String),
}
