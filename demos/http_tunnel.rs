//! Open an HTTP tunnel to a local web server.
//!
//! ```sh
//! EOSRIFT_AUTHTOKEN=eos_... cargo run --example http_tunnel -- wss://eosrift.example.com/control 3000
//! ```

use anyhow::Result;
use eosrift::{HttpTunnel, HttpTunnelOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let control_url = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8080/control".to_string());
    let port = args.next().unwrap_or_else(|| "3000".to_string());

    let tunnel = HttpTunnel::start(
        &control_url,
        &format!("127.0.0.1:{port}"),
        HttpTunnelOptions {
            authtoken: std::env::var("EOSRIFT_AUTHTOKEN").unwrap_or_default(),
            ..Default::default()
        },
    )
    .await?;

    println!("forwarding {} -> 127.0.0.1:{port}", tunnel.url());
    tunnel.wait().await?;
    Ok(())
}
