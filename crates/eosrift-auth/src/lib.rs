//! Authtoken and reservation store
//!
//! SQLite-backed persistence for client authtokens, reserved subdomains,
//! and reserved TCP ports. Tokens are stored hashed; the plaintext is
//! returned exactly once at creation time. Reservations tie a public name
//! or port to the token that owns it.

pub mod entities;
pub mod migrator;
pub mod store;
pub mod subdomain;
pub mod token;

pub use store::{ReservedSubdomain, ReservedTcpPort, Store, TokenRecord};
pub use subdomain::normalize_subdomain;
pub use token::{generate_token, hash_token, token_prefix, TOKEN_PREFIX_LEN};

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("empty db path")]
    EmptyDbPath,

    #[error("empty token")]
    EmptyToken,

    #[error("invalid token id")]
    InvalidTokenId,

    #[error("invalid port")]
    InvalidPort,

    #[error("empty subdomain")]
    EmptySubdomain,

    #[error("invalid subdomain")]
    InvalidSubdomain,

    #[error("subdomain too long")]
    SubdomainTooLong,

    #[error("already reserved")]
    AlreadyReserved,

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}
