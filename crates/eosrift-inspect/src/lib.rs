//! Local request inspector
//!
//! Keeps a bounded, redacted record of recent HTTP exchanges that passed
//! through a tunnel and serves a small local UI/API for browsing and
//! replaying them. Everything lives in memory on the client machine; the
//! server never sees inspector data.

pub mod http;
pub mod redact;
pub mod store;

pub use http::{router, HandlerOptions, ReplayOutcome, Replayer};
pub use redact::REDACTED_VALUE;
pub use store::{Entry, Store, StoreConfig};

use thiserror::Error;

/// Inspector errors
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("replay failed: {0}")]
    ReplayFailed(String),
}
