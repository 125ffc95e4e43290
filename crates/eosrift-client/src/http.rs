//! HTTP tunnels
//!
//! An HTTP tunnel holds one control session; every inbound yamux stream is
//! a raw HTTP connection from the server's proxy and gets piped to the
//! local upstream. When the control session dies the tunnel re-dials and
//! resumes the same public URL.

use crate::capture::{PreviewBuffer, TapStream};
use crate::control::create_http_tunnel;
use crate::host_header::{validate_host_header_mode, HostHeaderMode, HostRewriteStream};
use crate::summarize::summarize_exchange;
use crate::upstream::dial_upstream;
use crate::{ClientError, DEFAULT_CAPTURE_BYTES};
use chrono::Utc;
use eosrift_inspect::{Entry, Store};
use eosrift_proto::{HeaderKv, HttpTunnelRequest};
use eosrift_transport::{MuxSession, MuxStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::copy_bidirectional;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(250);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Options for an HTTP tunnel.
#[derive(Debug, Clone, Default)]
pub struct HttpTunnelOptions {
    pub authtoken: String,
    pub subdomain: String,
    pub domain: String,
    pub basic_auth: String,
    pub allow_methods: Vec<String>,
    pub allow_paths: Vec<String>,
    pub allow_path_prefixes: Vec<String>,
    pub allow_cidrs: Vec<String>,
    pub deny_cidrs: Vec<String>,
    pub request_header_add: Vec<HeaderKv>,
    pub request_header_remove: Vec<String>,
    pub response_header_add: Vec<HeaderKv>,
    pub response_header_remove: Vec<String>,

    /// Host header mode: `preserve` (default), `rewrite`, or a literal.
    pub host_header: String,

    /// Scheme used when dialing the local upstream: `http` (default) or
    /// `https`.
    pub upstream_scheme: String,

    /// Disable certificate verification for HTTPS upstreams.
    pub upstream_tls_skip_verify: bool,

    pub inspector: Option<Arc<Store>>,

    /// Cap for request/response previews kept for the inspector.
    /// Zero picks the default.
    pub capture_bytes: usize,
}

struct Shared {
    id: String,
    url: String,
    control_url: String,
    local_addr: String,

    /// Template re-sent on reconnect.
    request: HttpTunnelRequest,

    host_header: HostHeaderMode,
    upstream_scheme: String,
    upstream_tls_skip_verify: bool,

    inspector: Option<Arc<Store>>,
    capture_bytes: usize,

    session: Mutex<Arc<MuxSession>>,
    closing: AtomicBool,
    done_tx: mpsc::Sender<Result<(), ClientError>>,
}

impl Shared {
    fn finish(&self, result: Result<(), ClientError>) {
        let _ = self.done_tx.try_send(result);
    }

    fn reconnect_request(&self) -> HttpTunnelRequest {
        let mut request = self.request.clone();
        // Pin the allocated host so the same URL is resumed even when the
        // original request asked for a random id.
        if request.subdomain.trim().is_empty() && request.domain.trim().is_empty() {
            request.domain = host_from_url(&self.url);
        }
        request
    }
}

/// A running HTTP tunnel.
pub struct HttpTunnel {
    shared: Arc<Shared>,
    done_rx: Mutex<mpsc::Receiver<Result<(), ClientError>>>,
}

impl HttpTunnel {
    pub async fn start(
        control_url: &str,
        local_addr: &str,
        options: HttpTunnelOptions,
    ) -> Result<Self, ClientError> {
        let host_header = validate_host_header_mode(&options.host_header)?;

        let upstream_scheme = {
            let s = options.upstream_scheme.trim().to_ascii_lowercase();
            match s.as_str() {
                "" => "http".to_string(),
                "http" | "https" => s,
                _ => return Err(ClientError::UnsupportedUpstreamScheme),
            }
        };

        let request = HttpTunnelRequest {
            authtoken: options.authtoken,
            subdomain: options.subdomain,
            domain: options.domain,
            basic_auth: options.basic_auth,
            allow_method: options.allow_methods,
            allow_path: options.allow_paths,
            allow_path_prefix: options.allow_path_prefixes,
            allow_cidr: options.allow_cidrs,
            deny_cidr: options.deny_cidrs,
            request_header_add: options.request_header_add,
            request_header_remove: options.request_header_remove,
            response_header_add: options.response_header_add,
            response_header_remove: options.response_header_remove,
        };

        let (session, response) = create_http_tunnel(control_url, request.clone()).await?;
        info!(id = %response.id, url = %response.url, "http tunnel established");

        let (done_tx, done_rx) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            id: response.id,
            url: response.url,
            control_url: control_url.to_string(),
            local_addr: local_addr.to_string(),
            request,
            host_header,
            upstream_scheme,
            upstream_tls_skip_verify: options.upstream_tls_skip_verify,
            inspector: options.inspector,
            capture_bytes: if options.capture_bytes > 0 {
                options.capture_bytes
            } else {
                DEFAULT_CAPTURE_BYTES
            },
            session: Mutex::new(Arc::new(session)),
            closing: AtomicBool::new(false),
            done_tx,
        });

        tokio::spawn(accept_streams(Arc::clone(&shared)));

        Ok(Self {
            shared,
            done_rx: Mutex::new(done_rx),
        })
    }

    /// Public tunnel id (the subdomain label).
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Public URL of the tunnel.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Close the tunnel. Safe to call more than once.
    pub async fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            let session = self.shared.session.lock().await.clone();
            session.close().await;
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
        let session = shared.session.lock().await.clone();

        match session.accept_stream().await {
            Ok(stream) => {
                tokio::spawn(handle_stream(Arc::clone(&shared), stream));
            }
            Err(_) => {
                if shared.closing.load(Ordering::SeqCst) {
                    shared.finish(Ok(()));
                    return;
                }

                match reconnect(&shared).await {
                    Ok(()) => continue,
                    Err(err) => {
                        shared.finish(Err(err));
                        return;
                    }
                }
            }
        }
    }
}

async fn reconnect(shared: &Shared) -> Result<(), ClientError> {
    let mut delay = MIN_RECONNECT_DELAY;

    loop {
        if shared.closing.load(Ordering::SeqCst) {
            return Ok(());
        }

        match create_http_tunnel(&shared.control_url, shared.reconnect_request()).await {
            Ok((session, response)) => {
                if shared.closing.load(Ordering::SeqCst) {
                    session.close().await;
                    return Ok(());
                }

                if response.id != shared.id || response.url != shared.url {
                    session.close().await;
                    return Err(ClientError::ResumeMismatch);
                }

                let old = {
                    let mut guard = shared.session.lock().await;
                    std::mem::replace(&mut *guard, Arc::new(session))
                };
                old.close().await;

                info!(id = %shared.id, "http tunnel reconnected");
                return Ok(());
            }
            Err(err) if err.is_retryable_control_error() => {
                debug!("reconnect refused ({err}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
            Err(err) => return Err(err),
        }
    }
}

async fn handle_stream(shared: Arc<Shared>, stream: MuxStream) {
    let upstream = match dial_upstream(
        &shared.upstream_scheme,
        &shared.local_addr,
        shared.upstream_tls_skip_verify,
    )
    .await
    {
        Ok(upstream) => upstream,
        Err(err) => {
            debug!(addr = %shared.local_addr, "upstream dial failed: {err}");
            return;
        }
    };

    let rewrite_host = match &shared.host_header {
        HostHeaderMode::Preserve => None,
        HostHeaderMode::Rewrite => Some(shared.local_addr.clone()),
        HostHeaderMode::Literal(value) => Some(value.clone()),
    };

    let (req_preview, resp_preview) = if shared.inspector.is_some() {
        (
            Some(PreviewBuffer::new(shared.capture_bytes)),
            Some(PreviewBuffer::new(shared.capture_bytes)),
        )
    } else {
        (None, None)
    };

    let started_at = Utc::now();
    let start = Instant::now();

    let tunnel_side = TapStream::new(stream, req_preview.clone());
    let mut upstream_side = TapStream::new(upstream, resp_preview.clone());

    let copied = match rewrite_host {
        Some(host) => {
            let mut tunnel_side = HostRewriteStream::new(tunnel_side, host);
            copy_bidirectional(&mut tunnel_side, &mut upstream_side).await
        }
        None => {
            let mut tunnel_side = tunnel_side;
            copy_bidirectional(&mut tunnel_side, &mut upstream_side).await
        }
    };
    let (bytes_in, bytes_out) = copied.unwrap_or((0, 0));

    let (Some(store), Some(req_preview), Some(resp_preview)) =
        (&shared.inspector, req_preview, resp_preview)
    else {
        return;
    };

    let Some(summary) = summarize_exchange(&req_preview.bytes(), &resp_preview.bytes()) else {
        return;
    };

    store.add(Entry {
        id: String::new(),
        started_at,
        duration_ms: start.elapsed().as_millis() as i64,
        tunnel_id: shared.id.clone(),
        method: summary.method,
        path: summary.path,
        host: summary.host,
        status_code: summary.status_code,
        bytes_in,
        bytes_out,
        request_headers: summary.request_headers,
        response_headers: summary.response_headers,
    });
}

fn host_from_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match url::Url::parse(raw) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            },
            None => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_from_url() {
        assert_eq!(host_from_url("https://demo.tunnel.test"), "demo.tunnel.test");
        assert_eq!(
            host_from_url("https://demo.tunnel.test:8443"),
            "demo.tunnel.test:8443"
        );
        assert_eq!(host_from_url("not a url"), "not a url");
        assert_eq!(host_from_url(""), "");
    }

    #[test]
    fn test_retryable_control_errors() {
        assert!(ClientError::Control("too many active tunnels".into())
            .is_retryable_control_error());
        assert!(ClientError::Control("rate limit exceeded".into()).is_retryable_control_error());
        assert!(!ClientError::Control("unauthorized".into()).is_retryable_control_error());
        assert!(!ClientError::InvalidServerResponse.is_retryable_control_error());
    }
}
