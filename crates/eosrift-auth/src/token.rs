//! Token material: generation, hashing, display prefixes

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Characters of the plaintext kept for display.
pub const TOKEN_PREFIX_LEN: usize = 12;

/// Generate a fresh plaintext authtoken: `eos_` + 32 random bytes,
/// URL-safe base64 without padding.
pub fn generate_token() -> String {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    format!("eos_{}", URL_SAFE_NO_PAD.encode(raw))
}

/// SHA-256 hex of the plaintext; the only form ever persisted.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.trim().as_bytes());
    format!("{digest:x}")
}

/// Display-safe leading characters of a plaintext token.
pub fn token_prefix(token: &str) -> String {
    let token = token.trim();
    token.chars().take(TOKEN_PREFIX_LEN).collect()
}
