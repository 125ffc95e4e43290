//! High-level Eosrift client API
//!
//! Re-exports the tunnel client for embedding in Rust applications. Most
//! users want the `eosrift` CLI; this crate is for programs that open
//! tunnels themselves:
//!
//! ```ignore
//! use eosrift::{HttpTunnel, HttpTunnelOptions};
//!
//! let tunnel = HttpTunnel::start(
//!     "wss://eosrift.example.com/control",
//!     "127.0.0.1:3000",
//!     HttpTunnelOptions {
//!         authtoken: std::env::var("EOSRIFT_AUTHTOKEN").unwrap_or_default(),
//!         ..Default::default()
//!     },
//! )
//! .await?;
//!
//! println!("public url: {}", tunnel.url());
//! tunnel.wait().await?;
//! ```

pub use eosrift_client::{
    ClientError, HeaderKv, HttpTunnel, HttpTunnelOptions, TcpTunnel, TcpTunnelOptions,
};
pub use eosrift_inspect::{Entry as InspectEntry, Store as InspectStore, StoreConfig};
pub use eosrift_proto::{HttpTunnelRequest, TcpTunnelRequest};
