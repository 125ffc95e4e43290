//! yamux session wrapper
//!
//! Wraps `tokio_yamux::Session` behind a handle usable from many tasks: a
//! driver task pumps the session and queues inbound streams; `open_stream`
//! goes through the session's control handle. The default yamux config
//! keeps the connection alive with periodic pings, which doubles as dead
//! peer detection for tunnels idling behind NATs.

use crate::TransportError;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_yamux::{Config, Control, Session, StreamHandle};
use tracing::debug;

/// A single multiplexed stream. Implements `AsyncRead + AsyncWrite`.
pub type MuxStream = StreamHandle;

/// Queue depth for inbound streams awaiting accept.
const ACCEPT_BACKLOG: usize = 64;

/// A yamux session over an arbitrary byte stream.
pub struct MuxSession {
    control: Mutex<Control>,
    incoming: Mutex<mpsc::Receiver<StreamHandle>>,
    closed: Arc<AtomicBool>,
    closed_notify: Arc<Notify>,
    driver: JoinHandle<()>,
}

impl MuxSession {
    /// Create the client side of a session.
    pub fn client<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_session(Session::new_client(io, Config::default()))
    }

    /// Create the server side of a session.
    pub fn server<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_session(Session::new_server(io, Config::default()))
    }

    fn from_session<S>(mut session: Session<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let control = session.control();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_notify = Arc::new(Notify::new());

        let (tx, rx) = mpsc::channel::<StreamHandle>(ACCEPT_BACKLOG);
        let driver = {
            let closed = Arc::clone(&closed);
            let closed_notify = Arc::clone(&closed_notify);
            tokio::spawn(async move {
                while let Some(next) = session.next().await {
                    match next {
                        Ok(stream) => {
                            if tx.send(stream).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            debug!("yamux session ended: {err}");
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                closed_notify.notify_waiters();
            })
        };

        Self {
            control: Mutex::new(control),
            incoming: Mutex::new(rx),
            closed,
            closed_notify,
            driver,
        }
    }

    /// Open a new outbound stream.
    pub async fn open_stream(&self) -> Result<MuxStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed);
        }
        let mut control = self.control.lock().await;
        control
            .open_stream()
            .await
            .map_err(|err| TransportError::Mux(err.to_string()))
    }

    /// Accept the next inbound stream.
    pub async fn accept_stream(&self) -> Result<MuxStream, TransportError> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or(TransportError::SessionClosed)
    }

    /// Whether the underlying session has terminated.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until the underlying session terminates.
    pub async fn wait_closed(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            self.closed_notify.notified().await;
        }
    }

    /// Close the session and stop the driver.
    pub async fn close(&self) {
        let mut control = self.control.lock().await;
        control.close().await;
        self.driver.abort();
        self.closed.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_open_and_accept_stream() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = MuxSession::client(a);
        let server = MuxSession::server(b);

        let mut outbound = client.open_stream().await.unwrap();
        outbound.write_all(b"ping").await.unwrap();
        outbound.flush().await.unwrap();

        let mut inbound = server.accept_stream().await.unwrap();
        let mut buf = [0u8; 4];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_accept_after_close_errors() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = MuxSession::client(a);
        let server = MuxSession::server(b);

        client.close().await;
        drop(client);

        let err = server.accept_stream().await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_wait_closed_resolves() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = MuxSession::client(a);
        let server = MuxSession::server(b);

        drop(client);
        tokio::time::timeout(std::time::Duration::from_secs(5), server.wait_closed())
            .await
            .expect("session close not observed");
    }
}
