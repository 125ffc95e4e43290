//! Redaction of sensitive material before storage
//!
//! Credentials must never be visible in the inspector, even locally: a
//! screen-share or pasted screenshot of the UI should not leak tokens.

use crate::store::Entry;

pub const REDACTED_VALUE: &str = "REDACTED";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-access-token",
];

const SENSITIVE_QUERY_KEYS: &[&str] = &[
    "token",
    "access_token",
    "refresh_token",
    "auth",
    "apikey",
    "api_key",
    "key",
    "signature",
    "sig",
    "password",
    "pass",
    "passwd",
    "secret",
];

pub fn redact_entry(mut entry: Entry) -> Entry {
    entry.path = redact_path(&entry.path);
    redact_headers(&mut entry.request_headers);
    redact_headers(&mut entry.response_headers);
    entry
}

fn redact_headers(headers: &mut [(String, String)]) {
    for (name, value) in headers.iter_mut() {
        if SENSITIVE_HEADERS
            .iter()
            .any(|s| name.eq_ignore_ascii_case(s))
        {
            *value = REDACTED_VALUE.to_string();
        }
    }
}

fn redact_path(path: &str) -> String {
    let path = path.trim();
    let Some((base, query)) = path.split_once('?') else {
        return path.to_string();
    };

    let mut changed = false;
    let redacted: Vec<String> = query
        .split('&')
        .map(|pair| {
            let (key, _value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => return pair.to_string(),
            };
            if is_sensitive_query_key(key) {
                changed = true;
                format!("{key}={REDACTED_VALUE}")
            } else {
                pair.to_string()
            }
        })
        .collect();

    if !changed {
        return path.to_string();
    }
    format!("{base}?{}", redacted.join("&"))
}

fn is_sensitive_query_key(key: &str) -> bool {
    let k = key.trim().to_ascii_lowercase();
    SENSITIVE_QUERY_KEYS.contains(&k.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_redacts_sensitive_headers() {
        let entry = Entry {
            started_at: Utc::now(),
            method: "GET".into(),
            path: "/".into(),
            request_headers: vec![
                ("Authorization".into(), "Bearer secret".into()),
                ("Accept".into(), "*/*".into()),
            ],
            response_headers: vec![("Set-Cookie".into(), "session=abc".into())],
            ..Default::default()
        };

        let redacted = redact_entry(entry);
        assert_eq!(redacted.request_headers[0].1, REDACTED_VALUE);
        assert_eq!(redacted.request_headers[1].1, "*/*");
        assert_eq!(redacted.response_headers[0].1, REDACTED_VALUE);
    }

    #[test]
    fn test_redacts_sensitive_query_values() {
        let entry = Entry {
            started_at: Utc::now(),
            method: "GET".into(),
            path: "/cb?code=1&access_token=abc&x=2".into(),
            ..Default::default()
        };

        let redacted = redact_entry(entry);
        assert_eq!(redacted.path, "/cb?code=1&access_token=REDACTED&x=2");
    }

    #[test]
    fn test_leaves_plain_paths_alone() {
        let entry = Entry {
            started_at: Utc::now(),
            method: "GET".into(),
            path: "/healthz".into(),
            ..Default::default()
        };
        assert_eq!(redact_entry(entry).path, "/healthz");
    }
}
