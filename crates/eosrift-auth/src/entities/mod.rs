//! Database entities

pub mod auth_token;
pub mod reserved_subdomain;
pub mod reserved_tcp_port;

pub use auth_token::Entity as AuthToken;
pub use reserved_subdomain::Entity as ReservedSubdomain;
pub use reserved_tcp_port::Entity as ReservedTcpPort;
