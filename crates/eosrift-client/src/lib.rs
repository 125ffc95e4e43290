//! Tunnel client
//!
//! Dials the server's control endpoint, negotiates a tunnel, and forwards
//! every inbound yamux stream to the local upstream. HTTP tunnels survive
//! control-connection loss by re-dialing and resuming the same public URL;
//! captured traffic can feed the local inspector.

pub mod capture;
pub mod control;
pub mod host_header;
pub mod http;
pub mod summarize;
pub mod tcp;
pub mod upstream;

pub use capture::PreviewBuffer;
pub use control::dial_control_with_retry;
pub use host_header::{validate_host_header_mode, HostHeaderMode};
pub use http::{HttpTunnel, HttpTunnelOptions};
pub use summarize::summarize_exchange;
pub use tcp::{TcpTunnel, TcpTunnelOptions};

pub use eosrift_proto::HeaderKv;

use thiserror::Error;

/// Default cap for request/response preview captures.
pub const DEFAULT_CAPTURE_BYTES: usize = 64 * 1024;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the tunnel request with a message.
    #[error("{0}")]
    Control(String),

    #[error("invalid server response")]
    InvalidServerResponse,

    #[error("resume mismatch")]
    ResumeMismatch,

    #[error("unsupported upstream scheme")]
    UnsupportedUpstreamScheme,

    #[error("invalid host header: {0:?}")]
    InvalidHostHeader(String),

    #[error(transparent)]
    Transport(#[from] eosrift_transport::TransportError),

    #[error(transparent)]
    Proto(#[from] eosrift_proto::ProtoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Server-side conditions worth retrying with backoff during
    /// reconnects; anything else is treated as fatal.
    pub fn is_retryable_control_error(&self) -> bool {
        match self {
            ClientError::Control(msg) => matches!(
                msg.trim().to_ascii_lowercase().as_str(),
                "too many active tunnels" | "rate limit exceeded"
            ),
            _ => false,
        }
    }
}
