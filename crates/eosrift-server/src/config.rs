//! Server configuration from the environment
//!
//! All knobs come from `EOSRIFT_*` variables, matching the deployment
//! convention of the fronting proxy: the process is configured entirely by
//! its unit file / compose environment.

use crate::ServerError;
use std::env;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Domain the landing page, docs, and admin UI are served on.
    pub base_domain: String,

    /// Domain tunnel subdomains hang off of.
    pub tunnel_domain: String,

    /// Pass through proxy-provided headers (X-Forwarded-For and friends).
    /// When false the server strips them from inbound requests to prevent
    /// spoofing and regenerates them itself.
    pub trust_proxy_headers: bool,

    pub tcp_port_range_start: u16,
    pub tcp_port_range_end: u16,

    /// Enables /metrics when set (Authorization: Bearer <token>).
    pub metrics_token: String,

    /// Enables /admin and /api/admin/ when set.
    pub admin_token: String,

    /// Caps concurrent tunnels per authtoken. Zero means unlimited.
    pub max_tunnels_per_token: usize,

    /// Caps tunnel create attempts per authtoken per minute. Zero means
    /// unlimited.
    pub max_tunnel_creates_per_minute: u32,

    /// Path to the SQLite database.
    pub db_path: String,

    /// If set, ensured to exist in the database on startup. Bootstrap
    /// convenience; not required when tokens already exist.
    pub auth_token: String,

    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_domain: String::new(),
            tunnel_domain: String::new(),
            trust_proxy_headers: false,
            tcp_port_range_start: 20000,
            tcp_port_range_end: 40000,
            metrics_token: String::new(),
            admin_token: String::new(),
            max_tunnels_per_token: 0,
            max_tunnel_creates_per_minute: 0,
            db_path: String::new(),
            auth_token: String::new(),
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            base_domain: getenv("EOSRIFT_BASE_DOMAIN", ""),
            tunnel_domain: getenv("EOSRIFT_TUNNEL_DOMAIN", ""),
            trust_proxy_headers: getenv_bool("EOSRIFT_TRUST_PROXY_HEADERS", false),
            tcp_port_range_start: getenv_parsed(
                "EOSRIFT_TCP_PORT_RANGE_START",
                defaults.tcp_port_range_start,
            ),
            tcp_port_range_end: getenv_parsed(
                "EOSRIFT_TCP_PORT_RANGE_END",
                defaults.tcp_port_range_end,
            ),
            metrics_token: getenv("EOSRIFT_METRICS_TOKEN", ""),
            admin_token: getenv("EOSRIFT_ADMIN_TOKEN", ""),
            max_tunnels_per_token: getenv_parsed("EOSRIFT_MAX_TUNNELS_PER_TOKEN", 0),
            max_tunnel_creates_per_minute: getenv_parsed("EOSRIFT_MAX_TUNNEL_CREATES_PER_MIN", 0),
            db_path: getenv("EOSRIFT_DB_PATH", ""),
            auth_token: getenv("EOSRIFT_AUTH_TOKEN", ""),
            listen_addr: getenv("EOSRIFT_LISTEN_ADDR", &defaults.listen_addr),
        }
    }

    /// Reject configurations that cannot route anything.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.base_domain.is_empty() {
            return Err(ServerError::MissingConfig("EOSRIFT_BASE_DOMAIN"));
        }
        if self.tunnel_domain.is_empty() {
            return Err(ServerError::MissingConfig("EOSRIFT_TUNNEL_DOMAIN"));
        }
        Ok(())
    }
}

fn getenv(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                fallback.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => fallback.to_string(),
    }
}

fn getenv_bool(key: &str, fallback: bool) -> bool {
    match env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" | "on" => true,
            "0" | "f" | "false" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn getenv_parsed<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    match env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_domains() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_err());

        config.base_domain = "eosrift.test".into();
        assert!(config.validate().is_err());

        config.tunnel_domain = "tunnel.eosrift.test".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.tcp_port_range_start, 20000);
        assert_eq!(config.tcp_port_range_end, 40000);
        assert_eq!(config.max_tunnels_per_token, 0);
        assert!(!config.trust_proxy_headers);
    }
}
