//! Upstream target parsing
//!
//! `eosrift http` accepts a bare port (`3000`), a `host:port`, or an
//! `http(s)://` URL; `eosrift tcp` accepts a bare port or `host:port`.

use crate::CliError;

/// Parse an HTTP upstream target into `(scheme, host:port)`.
pub fn parse_http_upstream_target(input: &str) -> Result<(String, String), CliError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(CliError::EmptyUpstream);
    }

    if raw.contains("://") {
        let parsed =
            url::Url::parse(raw).map_err(|_| CliError::InvalidUpstream(input.to_string()))?;

        let scheme = parsed.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(CliError::UnsupportedUpstreamScheme(scheme));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| CliError::InvalidUpstream(input.to_string()))?;
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(CliError::InvalidUpstream(input.to_string()));
        }
        if parsed.path() != "" && parsed.path() != "/" {
            return Err(CliError::InvalidUpstream(input.to_string()));
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(CliError::InvalidUpstream(input.to_string()));
        }

        let port = parsed
            .port()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        return Ok((scheme, join_host_port(host, port)));
    }

    if let Some(port) = parse_port_literal(raw) {
        return Ok(("http".to_string(), format!("127.0.0.1:{port}")));
    }

    let (host, port) = split_host_port(raw).ok_or_else(|| CliError::InvalidUpstream(input.to_string()))?;
    Ok(("http".to_string(), join_host_port(&host, port)))
}

/// Parse a TCP upstream address into `host:port`.
pub fn parse_tcp_upstream_addr(input: &str) -> Result<String, CliError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(CliError::EmptyUpstream);
    }
    if raw.contains("://") {
        return Err(CliError::InvalidUpstream(input.to_string()));
    }

    if let Some(port) = parse_port_literal(raw) {
        return Ok(format!("127.0.0.1:{port}"));
    }

    let (host, port) =
        split_host_port(raw).ok_or_else(|| CliError::InvalidUpstream(input.to_string()))?;
    Ok(join_host_port(&host, port))
}

fn parse_port_literal(raw: &str) -> Option<u16> {
    raw.parse::<u16>().ok().filter(|port| *port > 0)
}

fn split_host_port(raw: &str) -> Option<(String, u16)> {
    if let Some(rest) = raw.strip_prefix('[') {
        // [v6]:port
        let (host, rest) = rest.split_once(']')?;
        let port = rest.strip_prefix(':')?;
        let port = parse_port_literal(port)?;
        return Some((format!("[{host}]"), port));
    }

    let (host, port) = raw.rsplit_once(':')?;
    if host.is_empty() || host.contains(':') {
        return None;
    }
    let port = parse_port_literal(port)?;
    Some((host.to_string(), port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
