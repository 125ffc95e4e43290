//! Host header handling for forwarded requests
//!
//! The public URL's Host is preserved by default (ngrok-like). `rewrite`
//! replaces it with the upstream address, and any other value is sent
//! literally. Rewriting happens on the raw byte stream: the first request
//! head is buffered, its Host line swapped, and everything after flows
//! through untouched.

use crate::ClientError;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// How the forwarded Host header is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostHeaderMode {
    Preserve,
    Rewrite,
    Literal(String),
}

/// Parse and validate a host-header mode string.
pub fn validate_host_header_mode(raw: &str) -> Result<HostHeaderMode, ClientError> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("preserve") {
        return Ok(HostHeaderMode::Preserve);
    }
    if s.eq_ignore_ascii_case("rewrite") {
        return Ok(HostHeaderMode::Rewrite);
    }
    if s.bytes().any(|c| c <= 0x20 || c == 0x7f) {
        return Err(ClientError::InvalidHostHeader(raw.to_string()));
    }
    Ok(HostHeaderMode::Literal(s.to_string()))
}

/// Oversized request heads fall back to raw proxying.
const MAX_HEAD_BYTES: usize = 64 * 1024;

enum RewriteState {
    Buffering,
    Draining { out: Vec<u8>, pos: usize },
    Passthrough,
}

/// A stream whose first HTTP request head gets its Host header replaced.
pub struct HostRewriteStream<S> {
    inner: S,
    host: String,
    state: RewriteState,
    head: Vec<u8>,
}

impl<S> HostRewriteStream<S> {
    pub fn new(inner: S, host: String) -> Self {
        Self {
            inner,
            host,
            state: RewriteState::Buffering,
            head: Vec::new(),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for HostRewriteStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let this = &mut *self;
            match &mut this.state {
                RewriteState::Passthrough => {
                    return Pin::new(&mut this.inner).poll_read(cx, buf);
                }
                RewriteState::Draining { out, pos } => {
                    if *pos < out.len() {
                        let n = (out.len() - *pos).min(buf.remaining());
                        buf.put_slice(&out[*pos..*pos + n]);
                        *pos += n;
                        return Poll::Ready(Ok(()));
                    }
                    this.state = RewriteState::Passthrough;
                }
                RewriteState::Buffering => {
                    let mut tmp = [0u8; 4096];
                    let mut read_buf = ReadBuf::new(&mut tmp);
                    ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
                    let chunk = read_buf.filled();

                    if chunk.is_empty() {
                        // EOF mid-head: flush what we have unmodified.
                        let out = std::mem::take(&mut this.head);
                        this.state = RewriteState::Draining { out, pos: 0 };
                        continue;
                    }

                    this.head.extend_from_slice(chunk);

                    if let Some(idx) = find_head_end(&this.head) {
                        let rest = this.head.split_off(idx + 4);
                        let head = std::mem::take(&mut this.head);
                        let mut out = rewrite_host_header(&head, &this.host);
                        out.extend_from_slice(&rest);
                        this.state = RewriteState::Draining { out, pos: 0 };
                        continue;
                    }

                    if this.head.len() > MAX_HEAD_BYTES {
                        // Head too large; give up on rewriting.
                        let out = std::mem::take(&mut this.head);
                        this.state = RewriteState::Draining { out, pos: 0 };
                        continue;
                    }
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HostRewriteStream<S> {
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

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Replace (or insert) the Host line in a complete request head.
pub fn rewrite_host_header(head: &[u8], host: &str) -> Vec<u8> {
    let host = host.trim();
    if host.is_empty() {
        return head.to_vec();
    }

    let trimmed = head.strip_suffix(b"\r\n\r\n").unwrap_or(head);
    let mut lines = trimmed.split(|&c| c == b'\n');

    let mut out = Vec::with_capacity(head.len() + host.len() + 16);

    let Some(request_line) = lines.next() else {
        return head.to_vec();
    };
    out.extend_from_slice(strip_cr(request_line));
    out.extend_from_slice(b"\r\n");

    let mut found = false;
    for line in lines {
        let line = strip_cr(line);
        if line.is_empty() {
            continue;
        }
        if line.len() >= 5 && line[..5].eq_ignore_ascii_case(b"host:") {
            out.extend_from_slice(b"Host: ");
            out.extend_from_slice(host.as_bytes());
            out.extend_from_slice(b"\r\n");
            found = true;
            continue;
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    if !found {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(host.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            validate_host_header_mode("").unwrap(),
            HostHeaderMode::Preserve
        );
        assert_eq!(
            validate_host_header_mode(" Preserve ").unwrap(),
            HostHeaderMode::Preserve
        );
        assert_eq!(
            validate_host_header_mode("rewrite").unwrap(),
            HostHeaderMode::Rewrite
        );
        assert_eq!(
            validate_host_header_mode("internal.test:8080").unwrap(),
            HostHeaderMode::Literal("internal.test:8080".into())
        );
        assert!(validate_host_header_mode("two words").is_err());
    }

    #[test]
    fn test_rewrite_replaces_existing_host() {
        let head = b"GET / HTTP/1.1\r\nHost: pub.example.com\r\nAccept: */*\r\n\r\n";
        let out = rewrite_host_header(head, "localhost:3000");
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Host: localhost:3000\r\n"));
        assert!(!text.contains("pub.example.com"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_rewrite_inserts_missing_host() {
        let head = b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n";
        let out = rewrite_host_header(head, "localhost:3000");
        assert!(String::from_utf8(out).unwrap().contains("Host: localhost:3000\r\n"));
    }

    #[tokio::test]
    async fn test_stream_rewrites_only_first_head() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let mut stream = HostRewriteStream::new(reader, "local.test".into());

        writer
            .write_all(b"GET /a HTTP/1.1\r\nHost: pub\r\n\r\nBODY Host: pub")
            .await
            .unwrap();
        drop(writer);

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();

        assert!(out.starts_with("GET /a HTTP/1.1\r\nHost: local.test\r\n\r\n"));
        // Bytes after the head are untouched.
        assert!(out.ends_with("BODY Host: pub"));
    }

    #[tokio::test]
    async fn test_stream_flushes_on_eof_without_head() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let mut stream = HostRewriteStream::new(reader, "local.test".into());

        writer.write_all(b"not an http head").await.unwrap();
        drop(writer);

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "not an http head");
    }
}
