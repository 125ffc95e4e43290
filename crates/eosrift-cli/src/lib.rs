//! eosrift CLI internals
//!
//! The binary lives in `main.rs`; everything testable (config file
//! handling, defaults resolution, upstream parsing, session output,
//! inspector replay routing) lives here.

pub mod config;
pub mod defaults;
pub mod headers;
pub mod replay;
pub mod session;
pub mod upstream;

use thiserror::Error;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("server address is empty")]
    EmptyServerAddr,

    #[error("invalid server address")]
    InvalidServerAddr,

    #[error("unsupported scheme: {0:?}")]
    UnsupportedScheme(String),

    #[error("empty upstream")]
    EmptyUpstream,

    #[error("invalid upstream {0:?}")]
    InvalidUpstream(String),

    #[error("unsupported upstream scheme {0:?}")]
    UnsupportedUpstreamScheme(String),

    #[error("invalid header entry {0:?}")]
    InvalidHeaderEntry(String),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
