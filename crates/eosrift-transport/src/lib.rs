//! Tunnel transport: WebSocket framing + yamux multiplexing
//!
//! The control connection is a WebSocket carrying binary frames; a yamux
//! session runs on top of it and every tunnel interaction (the control
//! exchange, each proxied connection) is a yamux stream. This crate adapts
//! WebSockets into byte streams and wraps yamux sessions for both sides.

pub mod mux;
pub mod ws;

pub use mux::{MuxSession, MuxStream};
pub use ws::{connect_control, WsByteStream};

use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("multiplexer error: {0}")]
    Mux(String),

    #[error("session closed")]
    SessionClosed,
}
