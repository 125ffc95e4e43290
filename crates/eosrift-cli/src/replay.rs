//! Inspector replay routing
//!
//! The inspector knows entries, not upstreams. `ReplayRouter` maps tunnel
//! ids to their local targets and replays a captured request line and
//! headers against the right one over a fresh connection. Bodies are not
//! replayed; the preview may have truncated them.

use async_trait::async_trait;
use eosrift_client::upstream::dial_upstream;
use eosrift_inspect::{Entry, InspectError, ReplayOutcome, Replayer};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Where a tunnel's traffic goes locally.
#[derive(Debug, Clone)]
pub struct ReplayTarget {
    pub scheme: String,
    pub addr: String,
    pub tls_skip_verify: bool,
}

/// Routes replays by tunnel id. Targets are registered as tunnels come up.
#[derive(Default)]
pub struct ReplayRouter {
    targets: Mutex<HashMap<String, ReplayTarget>>,
}

impl ReplayRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tunnel_id: &str, target: ReplayTarget) {
        self.targets
            .lock()
            .unwrap()
            .insert(tunnel_id.to_string(), target);
    }

    fn target_for(&self, tunnel_id: &str) -> Option<ReplayTarget> {
        self.targets.lock().unwrap().get(tunnel_id).cloned()
    }
}

/// Headers that must not be resent verbatim: connection control is ours,
/// and there is no body to frame.
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "content-length",
    "transfer-encoding",
    "upgrade",
];

#[async_trait]
impl Replayer for ReplayRouter {
    async fn replay(&self, entry: Entry) -> Result<ReplayOutcome, InspectError> {
        let target = self
            .target_for(&entry.tunnel_id)
            .ok_or_else(|| InspectError::ReplayFailed("unknown tunnel".to_string()))?;

        let mut upstream = dial_upstream(&target.scheme, &target.addr, target.tls_skip_verify)
            .await
            .map_err(|err| InspectError::ReplayFailed(err.to_string()))?;

        let request = build_replay_request(&entry);
        upstream
            .write_all(request.as_bytes())
            .await
            .map_err(|err| InspectError::ReplayFailed(err.to_string()))?;

        let mut response = Vec::with_capacity(1024);
        let mut buf = [0u8; 1024];
        loop {
            let n = upstream
                .read(&mut buf)
                .await
                .map_err(|err| InspectError::ReplayFailed(err.to_string()))?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response.len() >= 1024 || response.windows(2).any(|w| w == b"\r\n") {
                break;
            }
        }

        Ok(ReplayOutcome {
            status_code: parse_status_line(&response),
        })
    }
}

fn build_replay_request(entry: &Entry) -> String {
    let mut request = format!("{} {} HTTP/1.1\r\n", entry.method, entry.path);

    let host = if entry.host.is_empty() {
        "localhost"
    } else {
        &entry.host
    };
    request.push_str(&format!("Host: {host}\r\n"));

    for (name, value) in &entry.request_headers {
        if SKIPPED_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s)) {
            continue;
        }
        request.push_str(&format!("{name}: {value}\r\n"));
    }

    request.push_str("Connection: close\r\n\r\n");
    request
}

fn parse_status_line(response: &[u8]) -> Option<u16> {
    let line_end = response.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&response[..line_end]).ok()?;
    let mut parts = line.split_ascii_whitespace();

    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_build_replay_request() {
        let entry = Entry {
            started_at: Utc::now(),
            method: "POST".into(),
            path: "/hooks/github".into(),
            host: "demo.tunnel.eosrift.test".into(),
            request_headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("Content-Length".into(), "123".into()),
                ("Connection".into(), "keep-alive".into()),
            ],
            ..Default::default()
        };

        let request = build_replay_request(&entry);
        assert!(request.starts_with("POST /hooks/github HTTP/1.1\r\n"));
        assert!(request.contains("Host: demo.tunnel.eosrift.test\r\n"));
        assert!(request.contains("Content-Type: application/json\r\n"));
        assert!(!request.contains("Content-Length"));
        assert!(request.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line(b"HTTP/1.1 204 No Content\r\n"), Some(204));
        assert_eq!(parse_status_line(b"HTTP/1.0 500 Oops\r\nX: y\r\n"), Some(500));
        assert_eq!(parse_status_line(b"not http"), None);
        assert_eq!(parse_status_line(b""), None);
    }

    #[test]
    fn test_router_targets() {
        let router = ReplayRouter::new();
        assert!(router.target_for("t1").is_none());

        router.register(
            "t1",
            ReplayTarget {
                scheme: "http".into(),
                addr: "127.0.0.1:3000".into(),
                tls_skip_verify: false,
            },
        );
        assert_eq!(router.target_for("t1").unwrap().addr, "127.0.0.1:3000");
    }
}
