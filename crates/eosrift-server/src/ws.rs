//! axum WebSocket byte-stream adapter
//!
//! Server-side twin of the client's tungstenite adapter: flattens an
//! upgraded axum WebSocket into `AsyncRead + AsyncWrite` so a yamux
//! session can run over it.

use axum::extract::ws::{Message, WebSocket};
use bytes::{Buf, BytesMut};
use futures_util::{Sink, Stream};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub struct AxumWsStream {
    inner: WebSocket,
    read_buf: BytesMut,
    read_closed: bool,
}

impl AxumWsStream {
    pub fn new(inner: WebSocket) -> Self {
        Self {
            inner,
            read_buf: BytesMut::new(),
            read_closed: false,
        }
    }
}

fn to_io_error(err: axum::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

impl AsyncRead for AxumWsStream {
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
                Some(Ok(_)) => {}
            }
        }
    }
}

impl AsyncWrite for AxumWsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        ready!(Pin::new(&mut self.inner).poll_ready(cx)).map_err(to_io_error)?;
        Pin::new(&mut self.inner)
            .start_send(Message::Binary(buf.to_vec().into()))
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
