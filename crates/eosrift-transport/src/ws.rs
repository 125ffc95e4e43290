//! WebSocket byte-stream adapter
//!
//! yamux wants an ordered byte stream; a WebSocket delivers discrete
//! messages. `WsByteStream` flattens binary messages into an
//! `AsyncRead + AsyncWrite` pipe: reads drain queued binary payloads,
//! writes become single binary messages. Close frames and EOF both read as
//! end-of-stream.

use crate::{MuxSession, TransportError};
use bytes::{Buf, BytesMut};
use futures_util::{Sink, Stream};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A tokio-tungstenite WebSocket adapted into a byte stream.
pub struct WsByteStream<S> {
    inner: WebSocketStream<S>,
    read_buf: BytesMut,
    read_closed: bool,
}

impl<S> WsByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            read_buf: BytesMut::new(),
            read_closed: false,
        }
    }
}

fn to_io_error(err: tokio_tungstenite::tungstenite::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

impl<S> AsyncRead for WsByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                let n = self.read_buf.len().min(buf.remaining());
                buf.put_slice(&self.read_buf[..n]);
                self.read_buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            if self.read_closed {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                None => {
                    self.read_closed = true;
                    return Poll::Ready(Ok(()));
                }
                Some(Err(err)) => return Poll::Ready(Err(to_io_error(err))),
                Some(Ok(Message::Binary(data))) => {
                    self.read_buf.extend_from_slice(&data);
                }
                Some(Ok(Message::Close(_))) => {
                    self.read_closed = true;
                    return Poll::Ready(Ok(()));
                }
                // Pings are answered by the library; anything else carries
                // no tunnel bytes.
                Some(Ok(_)) => {}
            }
        }
    }
}

impl<S> AsyncWrite for WsByteStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        ready!(Pin::new(&mut self.inner).poll_ready(cx)).map_err(to_io_error)?;
        Pin::new(&mut self.inner)
            .start_send(Message::binary(buf.to_vec()))
            .map_err(to_io_error)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(to_io_error)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(to_io_error)
    }
}

/// Dial the server's control endpoint and layer a client-side yamux
/// session over the WebSocket.
pub async fn connect_control(control_url: &str) -> Result<MuxSession, TransportError> {
    let (ws, _response) = connect_async(control_url).await?;
    let io: WsByteStream<MaybeTlsStream<TcpStream>> = WsByteStream::new(ws);
    Ok(MuxSession::client(io))
}
