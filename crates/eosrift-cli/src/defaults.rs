//! Defaults resolution: flag > environment > config file > built-in

use crate::config::ConfigFile;

pub const DEFAULT_SERVER_ADDR: &str = "https://eosrift.com";
pub const DEFAULT_INSPECT_ADDR: &str = "127.0.0.1:4040";
pub const DEFAULT_HOST_HEADER: &str = "preserve";

fn getenv(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn resolve_server_addr(flag: Option<&str>, config: &ConfigFile) -> String {
    if let Some(flag) = flag.map(str::trim).filter(|s| !s.is_empty()) {
        return flag.to_string();
    }
    if let Some(env) = getenv("EOSRIFT_SERVER_ADDR") {
        return env;
    }
    // Legacy: a full ws(s) control URL.
    if let Some(env) = getenv("EOSRIFT_CONTROL_URL") {
        return env;
    }
    if !config.server_addr.trim().is_empty() {
        return config.server_addr.trim().to_string();
    }
    DEFAULT_SERVER_ADDR.to_string()
}

pub fn resolve_authtoken(flag: Option<&str>, config: &ConfigFile) -> String {
    if let Some(flag) = flag.map(str::trim).filter(|s| !s.is_empty()) {
        return flag.to_string();
    }
    if let Some(env) = getenv("EOSRIFT_AUTHTOKEN") {
        return env;
    }
    if let Some(env) = getenv("EOSRIFT_AUTH_TOKEN") {
        return env;
    }
    config.authtoken.trim().to_string()
}

pub fn resolve_inspect_enabled(flag: Option<bool>, config: &ConfigFile) -> bool {
    if let Some(flag) = flag {
        return flag;
    }
    config.inspect.unwrap_or(true)
}

pub fn resolve_inspect_addr(flag: Option<&str>, config: &ConfigFile) -> String {
    if let Some(flag) = flag.map(str::trim).filter(|s| !s.is_empty()) {
        return flag.to_string();
    }
    if let Some(env) = getenv("EOSRIFT_INSPECT_ADDR") {
        return env;
    }
    if !config.inspect_addr.trim().is_empty() {
        return config.inspect_addr.trim().to_string();
    }
    DEFAULT_INSPECT_ADDR.to_string()
}

pub fn resolve_host_header(flag: Option<&str>, config: &ConfigFile) -> String {
    if let Some(flag) = flag.map(str::trim).filter(|s| !s.is_empty()) {
        return flag.to_string();
    }
    if !config.host_header.trim().is_empty() {
        return config.host_header.trim().to_string();
    }
    DEFAULT_HOST_HEADER.to_string()
}
