//! Client configuration file
//!
//! YAML at `~/.config/eosrift/eosrift.yml` (or `EOSRIFT_CONFIG`). Holds
//! the authtoken, server address, inspector preferences, and named tunnel
//! definitions for `eosrift start`.

use crate::CliError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Header additions: tolerant of the common YAML shapes. A list of
/// `"Name: value"` strings is canonical, but a mapping (the natural thing
/// to type when the value has no quotes) works too.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderAddList(pub Vec<String>);

impl<'de> Deserialize<'de> for HeaderAddList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        header_strings_from_value(&value).map(HeaderAddList).map_err(D::Error::custom)
    }
}

fn header_strings_from_value(value: &serde_yaml::Value) -> Result<Vec<String>, String> {
    match value {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![s.to_string()])
            }
        }
        serde_yaml::Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_yaml::Value::Null => {}
                    serde_yaml::Value::String(s) => {
                        let s = s.trim();
                        if s.is_empty() {
                            return Err("invalid header entry: empty string".to_string());
                        }
                        out.push(s.to_string());
                    }
                    serde_yaml::Value::Mapping(mapping) => {
                        out.extend(header_strings_from_mapping(mapping)?);
                    }
                    other => {
                        return Err(format!("invalid header entry: {other:?}"));
                    }
                }
            }
            Ok(out)
        }
        serde_yaml::Value::Mapping(mapping) => header_strings_from_mapping(mapping),
        other => Err(format!("invalid header list: {other:?}")),
    }
}

fn header_strings_from_mapping(
    mapping: &serde_yaml::Mapping,
) -> Result<Vec<String>, String> {
    let mut out = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let (serde_yaml::Value::String(key), serde_yaml::Value::String(value)) = (key, value)
        else {
            return Err("invalid header mapping: non-string key or value".to_string());
        };
        let key = key.trim();
        if key.is_empty() {
            return Err("invalid header mapping: empty key".to_string());
        }
        out.push(format!("{}: {}", key, value.trim()));
    }
    Ok(out)
}

/// A named tunnel definition under `tunnels:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunnelDef {
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub addr: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subdomain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub basic_auth: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_header: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_method: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_path_prefix: Vec<String>,

    #[serde(default, skip_serializing_if = "header_list_is_empty")]
    pub request_header_add: HeaderAddList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_header_remove: Vec<String>,
    #[serde(default, skip_serializing_if = "header_list_is_empty")]
    pub response_header_add: HeaderAddList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_header_remove: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub upstream_tls_skip_verify: bool,

    /// Requested public port for tcp tunnels; 0 auto-allocates.
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub remote_port: u16,
}

fn header_list_is_empty(list: &HeaderAddList) -> bool {
    list.0.is_empty()
}

fn is_zero_port(port: &u16) -> bool {
    *port == 0
}

/// The config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub authtoken: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_addr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspect: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub inspect_addr: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_header: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tunnels: BTreeMap<String, TunnelDef>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Default config path: `$XDG_CONFIG_HOME/eosrift/eosrift.yml` with the
/// platform config dir as fallback.
pub fn default_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let xdg = xdg.trim();
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("eosrift").join("eosrift.yml");
        }
    }

    match dirs::config_dir() {
        Some(dir) => dir.join("eosrift").join("eosrift.yml"),
        None => PathBuf::from("eosrift.yml"),
    }
}

/// Load the config. A missing file is not an error; the bool reports
/// whether the file existed.
pub fn load(path: &Path) -> Result<(ConfigFile, bool), CliError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((ConfigFile::default(), false));
        }
        Err(err) => return Err(err.into()),
    };

    let config: ConfigFile = serde_yaml::from_str(&raw)?;
    Ok((config, true))
}

/// Save the config atomically: temp file in the same directory, 0600,
/// rename into place.
pub fn save(path: &Path, config: &ConfigFile) -> Result<(), CliError> {
    let mut config = config.clone();
    if config.version == 0 {
        config.version = 1;
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
    }

    let mut body = serde_yaml::to_string(&config)?;
    if !body.ends_with('\n') {
        body.push('\n');
    }

    let tmp = dir.join(format!(
        ".eosrift-{}.tmp",
        std::process::id(),
    ));
    std::fs::write(&tmp, body.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Normalize a server address into the control WebSocket URL.
///
/// Accepts `ws(s)://` URLs (used as-is, path defaulted), `http(s)://`
/// URLs (scheme mapped, `/control` appended), and bare `host[:port]`
/// (defaults to `wss`, unless a non-443 port is given).
pub fn control_url_from_server_addr(server_addr: &str) -> Result<String, CliError> {
    let s = server_addr.trim();
    if s.is_empty() {
        return Err(CliError::EmptyServerAddr);
    }

    if s.contains("://") {
        let parsed = url::Url::parse(s).map_err(|_| CliError::InvalidServerAddr)?;
        let host = parsed
            .host_str()
            .ok_or(CliError::InvalidServerAddr)?
            .to_string();
        let host_port = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        let base_path = parsed.path().trim_end_matches('/').to_string();

        let ws_scheme = match parsed.scheme() {
            "ws" | "wss" => {
                let path = if base_path.is_empty() {
                    "/control".to_string()
                } else {
                    parsed.path().to_string()
                };
                return Ok(format!("{}://{host_port}{path}", parsed.scheme()));
            }
            "http" => "ws",
            "https" => "wss",
            other => return Err(CliError::UnsupportedScheme(other.to_string())),
        };

        return Ok(format!("{ws_scheme}://{host_port}{base_path}/control"));
    }

    let (host_part, path_part) = match s.find('/') {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    };
    let host_part = host_part.trim();
    if host_part.is_empty() {
        return Err(CliError::InvalidServerAddr);
    }

    let scheme = match host_part.rsplit_once(':') {
        Some((_, port)) if port.chars().all(|c| c.is_ascii_digit()) && port != "443" => "ws",
        _ => "wss",
    };

    let base_path = path_part.trim_end_matches('/');
    Ok(format!("{scheme}://{host_part}{base_path}/control"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_url_from_ws_and_http_schemes() {
        assert_eq!(
            control_url_from_server_addr("wss://eosrift.test").unwrap(),
            "wss://eosrift.test/control"
        );
        assert_eq!(
            control_url_from_server_addr("ws://eosrift.test/custom").unwrap(),
            "ws://eosrift.test/custom"
        );
        assert_eq!(
            control_url_from_server_addr("https://eosrift.test").unwrap(),
            "wss://eosrift.test/control"
        );
        assert_eq!(
            control_url_from_server_addr("http://localhost:8080").unwrap(),
            "ws://localhost:8080/control"
        );
        assert_eq!(
            control_url_from_server_addr("https://eosrift.test/base/").unwrap(),
            "wss://eosrift.test/base/control"
        );
        assert!(control_url_from_server_addr("ftp://x").is_err());
        assert!(control_url_from_server_addr("").is_err());
    }

    #[test]
    fn test_control_url_from_bare_host() {
        assert_eq!(
            control_url_from_server_addr("eosrift.test").unwrap(),
            "wss://eosrift.test/control"
        );
        assert_eq!(
            control_url_from_server_addr("eosrift.test:443").unwrap(),
            "wss://eosrift.test:443/control"
        );
        assert_eq!(
            control_url_from_server_addr("localhost:8080").unwrap(),
            "ws://localhost:8080/control"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (config, existed) = load(&dir.path().join("nope.yml")).unwrap();
        assert!(!existed);
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eosrift.yml");

        let mut config = ConfigFile {
            authtoken: "eos_x".into(),
            server_addr: "https://eosrift.test".into(),
            ..Default::default()
        };
        config.tunnels.insert(
            "web".into(),
            TunnelDef {
                proto: "http".into(),
                addr: "3000".into(),
                subdomain: "demo".into(),
                ..Default::default()
            },
        );

        save(&path, &config).unwrap();
        let (loaded, existed) = load(&path).unwrap();
        assert!(existed);
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.authtoken, "eos_x");
        assert_eq!(loaded.tunnels["web"].subdomain, "demo");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_header_add_list_accepts_all_yaml_shapes() {
        let yaml = r#"
tunnels:
  strings:
    proto: http
    addr: 3000
    request_header_add:
      - "X-One: 1"
      - "X-Two: 2"
  mapping:
    proto: http
    addr: 3000
    request_header_add:
      X-One: "1"
  seq_of_mappings:
    proto: http
    addr: 3000
    request_header_add:
      - X-One: "1"
      - X-Two: "2"
"#;
        let config: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.tunnels["strings"].request_header_add.0,
            vec!["X-One: 1", "X-Two: 2"]
        );
        assert_eq!(config.tunnels["mapping"].request_header_add.0, vec!["X-One: 1"]);
        assert_eq!(
            config.tunnels["seq_of_mappings"].request_header_add.0,
            vec!["X-One: 1", "X-Two: 2"]
        );
    }

    #[test]
    fn test_header_add_list_rejects_garbage() {
        let yaml = r#"
tunnels:
  bad:
    proto: http
    addr: 3000
    request_header_add:
      - 42
"#;
        assert!(serde_yaml::from_str::<ConfigFile>(yaml).is_err());
    }

    #[test]
    fn test_default_path_honors_xdg() {
        // Only checks shape; the environment is process-global.
        let path = default_path();
        assert!(path.to_string_lossy().ends_with("eosrift.yml"));
    }
}
