//! Tunnel Control Protocol
//!
//! This crate defines the control messages exchanged between the Eosrift
//! client and server, the JSON line framing used on control streams, and
//! the validation of client-supplied tunnel policy (allowed methods, paths,
//! CIDRs, and header transforms).

pub mod json;
pub mod messages;
pub mod validate;

pub use json::{read_json, write_json};
pub use messages::{
    HeaderKv, HttpTunnelRequest, HttpTunnelResponse, RequestKind, TcpTunnelRequest,
    TcpTunnelResponse, TunnelRequest, TunnelResponse,
};
pub use validate::{
    normalize_header_name, parse_basic_auth, parse_cidr_list, parse_method_list, parse_path_list,
    validate_header_value, BasicAuthSpec,
};

use thiserror::Error;

/// URL path of the control endpoint on the server.
pub const CONTROL_PATH: &str = "/control";

/// Upper bound for a single control frame (request or response line).
pub const MAX_CONTROL_FRAME_BYTES: usize = 64 * 1024;

/// Upper bound for entries in client-supplied policy lists.
pub const MAX_LIST_ENTRIES: usize = 64;

/// Upper bound for a single transformed header value.
pub const MAX_HEADER_VALUE_BYTES: usize = 8 * 1024;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: String, value: String },

    #[error("invalid {field}: too many entries")]
    TooManyEntries { field: String },

    #[error("control frame too large")]
    FrameTooLarge,

    #[error("connection closed before a response was received")]
    UnexpectedEof,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtoError {
    pub(crate) fn invalid(field: &str, value: &str) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}
