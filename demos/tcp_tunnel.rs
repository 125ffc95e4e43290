//! Open a TCP tunnel to a local service.
//!
//! ```sh
//! EOSRIFT_AUTHTOKEN=eos_... cargo run --example tcp_tunnel -- wss://eosrift.example.com/control 5432
//! ```

use anyhow::Result;
use eosrift::{TcpTunnel, TcpTunnelOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let control_url = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8080/control".to_string());
    let port = args.next().unwrap_or_else(|| "5432".to_string());

    let tunnel = TcpTunnel::start(
        &control_url,
        &format!("127.0.0.1:{port}"),
        TcpTunnelOptions {
            authtoken: std::env::var("EOSRIFT_AUTHTOKEN").unwrap_or_default(),
            remote_port: 0,
        },
    )
    .await?;

    println!("public port: {}", tunnel.remote_port());
    tunnel.wait().await?;
    Ok(())
}
