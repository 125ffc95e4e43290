//! TCP tunnels
//!
//! Simpler than HTTP: one control session, one public port, raw byte
//! copies. TCP tunnels do not reconnect; the allocated port may be gone
//! on re-dial, so the caller decides what a restart means.

use crate::control::{control_exchange, dial_control_with_retry};
use crate::ClientError;
use eosrift_proto::{TcpTunnelRequest, TunnelRequest, TunnelResponse};
use eosrift_transport::{MuxSession, MuxStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Options for a TCP tunnel.
#[derive(Debug, Clone, Default)]
pub struct TcpTunnelOptions {
    pub authtoken: String,

    /// Requested public port; 0 lets the server pick.
    pub remote_port: u16,
}

struct Shared {
    remote_port: u16,
    local_addr: String,
    session: Arc<MuxSession>,
    closing: AtomicBool,
    done_tx: mpsc::Sender<Result<(), ClientError>>,
}

impl Shared {
    fn finish(&self, result: Result<(), ClientError>) {
        let _ = self.done_tx.try_send(result);
    }
}

/// A running TCP tunnel.
pub struct TcpTunnel {
    shared: Arc<Shared>,
    done_rx: Mutex<mpsc::Receiver<Result<(), ClientError>>>,
}

impl TcpTunnel {
    pub async fn start(
        control_url: &str,
        local_addr: &str,
        options: TcpTunnelOptions,
    ) -> Result<Self, ClientError> {
        let session = dial_control_with_retry(control_url).await?;

        let request = TunnelRequest::Tcp(TcpTunnelRequest {
            authtoken: options.authtoken,
            remote_port: options.remote_port,
        });

        let response = match control_exchange(&session, request).await {
            Ok(response) => response,
            Err(err) => {
                session.close().await;
                return Err(err);
            }
        };

        let response = match response {
            TunnelResponse::Tcp(resp) => resp,
            TunnelResponse::Http(_) => {
                session.close().await;
                return Err(ClientError::InvalidServerResponse);
            }
        };

        if let Some(message) = response.error {
            session.close().await;
            return Err(ClientError::Control(message));
        }

        info!(remote_port = response.remote_port, "tcp tunnel established");

        let (done_tx, done_rx) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            remote_port: response.remote_port,
            local_addr: local_addr.to_string(),
            session: Arc::new(session),
            closing: AtomicBool::new(false),
            done_tx,
        });

        tokio::spawn(accept_streams(Arc::clone(&shared)));

        Ok(Self {
            shared,
            done_rx: Mutex::new(done_rx),
        })
    }

    /// The allocated public port.
    pub fn remote_port(&self) -> u16 {
        self.shared.remote_port
    }

    /// Public address for display, given the server host.
    pub fn remote_addr(&self, server_host: &str) -> String {
        format!("{server_host}:{}", self.shared.remote_port)
    }

    /// Close the tunnel. Safe to call more than once.
    pub async fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            self.shared.session.close().await;
        }
    }

    /// Wait until the tunnel ends; returns the terminating error, if any.
    pub async fn wait(&self) -> Result<(), ClientError> {
        let mut done_rx = self.done_rx.lock().await;
        done_rx.recv().await.unwrap_or(Ok(()))
    }
}

async fn accept_streams(shared: Arc<Shared>) {
    loop {
        match shared.session.accept_stream().await {
            Ok(stream) => {
                tokio::spawn(handle_stream(Arc::clone(&shared), stream));
            }
            Err(err) => {
                if shared.closing.load(Ordering::SeqCst) {
                    shared.finish(Ok(()));
                } else {
                    shared.finish(Err(err.into()));
                }
                return;
            }
        }
    }
}

async fn handle_stream(shared: Arc<Shared>, mut stream: MuxStream) {
    let mut upstream = match TcpStream::connect(&shared.local_addr).await {
        Ok(upstream) => upstream,
        Err(err) => {
            debug!(addr = %shared.local_addr, "upstream dial failed: {err}");
            return;
        }
    };

    let _ = copy_bidirectional(&mut stream, &mut upstream).await;
}
