//! Header flag parsing
//!
//! `--request-header-add "Name: value"` also accepts `Name=value`, which
//! is easier to type in shells. Removal flags take just the name.

use crate::CliError;
use eosrift_proto::HeaderKv;

/// Parse one `Name: value` (or `Name=value`) entry.
pub fn parse_header_kv(raw: &str) -> Result<HeaderKv, CliError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(CliError::InvalidHeaderEntry(raw.to_string()));
    }

    let split = s
        .split_once(':')
        .or_else(|| s.split_once('='))
        .ok_or_else(|| CliError::InvalidHeaderEntry(raw.to_string()))?;

    let name = split.0.trim();
    let value = split.1.trim();
    if name.is_empty() {
        return Err(CliError::InvalidHeaderEntry(raw.to_string()));
    }

    Ok(HeaderKv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Parse a list of additions (flag values or config entries).
pub fn parse_header_kv_list(raw: &[String]) -> Result<Vec<HeaderKv>, CliError> {
    raw.iter().map(|entry| parse_header_kv(entry)).collect()
}

/// Parse a list of removals: plain header names.
pub fn parse_header_name_list(raw: &[String]) -> Result<Vec<String>, CliError> {
    raw.iter()
        .map(|entry| {
            let name = entry.trim();
            if name.is_empty() || name.contains([':', '=', ' ']) {
                return Err(CliError::InvalidHeaderEntry(entry.to_string()));
            }
            Ok(name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_kv_forms() {
        let kv = parse_header_kv("X-API-Key: secret").unwrap();
        assert_eq!(kv.name, "X-API-Key");
        assert_eq!(kv.value, "secret");

        let kv = parse_header_kv("X-Env=prod").unwrap();
        assert_eq!(kv.name, "X-Env");
        assert_eq!(kv.value, "prod");

        // Colon wins over equals when both appear.
        let kv = parse_header_kv("X-Math: a=b").unwrap();
        assert_eq!(kv.value, "a=b");

        assert!(parse_header_kv("").is_err());
        assert!(parse_header_kv("no-separator").is_err());
        assert!(parse_header_kv(": value").is_err());
    }

    #[test]
    fn test_parse_header_name_list() {
        let names = parse_header_name_list(&["X-One".into(), " X-Two ".into()]).unwrap();
        assert_eq!(names, vec!["X-One", "X-Two"]);
        assert!(parse_header_name_list(&["Bad: value".into()]).is_err());
    }
}
