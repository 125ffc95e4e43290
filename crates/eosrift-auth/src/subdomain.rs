//! Subdomain normalization
//!
//! Reserved subdomains are single DNS labels: lowercase, 1-63 chars,
//! `[a-z0-9-]`, no leading or trailing hyphen, no dots.

use crate::AuthError;

pub fn normalize_subdomain(raw: &str) -> Result<String, AuthError> {
    let s = raw.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(AuthError::EmptySubdomain);
    }
    if s.contains('.') {
        return Err(AuthError::InvalidSubdomain);
    }
    if s.len() > 63 {
        return Err(AuthError::SubdomainTooLong);
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err(AuthError::InvalidSubdomain);
    }
    if !s
        .bytes()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'-')
    {
        return Err(AuthError::InvalidSubdomain);
    }
    Ok(s)
}
