//! Traffic capture for the inspector
//!
//! `PreviewBuffer` keeps the first N bytes of a direction; `TapStream`
//! tees everything read from a stream into one. Writes pass through
//! untouched, so a tapped stream still works with `copy_bidirectional`.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A capped, shareable byte sink holding the head of a stream.
#[derive(Clone)]
pub struct PreviewBuffer {
    limit: usize,
    buf: Arc<Mutex<Vec<u8>>>,
}

impl PreviewBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append bytes, silently dropping anything past the cap.
    pub fn push(&self, data: &[u8]) {
        if self.limit == 0 {
            return;
        }
        let mut buf = self.buf.lock().unwrap();
        let remaining = self.limit.saturating_sub(buf.len());
        if remaining > 0 {
            buf.extend_from_slice(&data[..data.len().min(remaining)]);
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }
}

/// A stream whose reads are teed into a `PreviewBuffer`.
pub struct TapStream<S> {
    inner: S,
    tap: Option<PreviewBuffer>,
}

impl<S> TapStream<S> {
    pub fn new(inner: S, tap: Option<PreviewBuffer>) -> Self {
        Self { inner, tap }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TapStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        if let Some(tap) = &self.tap {
            let filled = buf.filled();
            if filled.len() > before {
                tap.push(&filled[before..]);
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TapStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tap_captures_reads_up_to_cap() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let preview = PreviewBuffer::new(5);
        let mut tapped = TapStream::new(reader, Some(preview.clone()));

        writer.write_all(b"hello world").await.unwrap();
        drop(writer);

        let mut out = Vec::new();
        tapped.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"hello world");
        assert_eq!(preview.bytes(), b"hello");
    }

    #[tokio::test]
    async fn test_writes_pass_through_untapped() {
        let (client, mut server) = tokio::io::duplex(1024);
        let preview = PreviewBuffer::new(64);
        let mut tapped = TapStream::new(client, Some(preview.clone()));

        tapped.write_all(b"request").await.unwrap();
        tapped.flush().await.unwrap();
        drop(tapped);

        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"request");
        // Only reads are captured.
        assert!(preview.bytes().is_empty());
    }
}
