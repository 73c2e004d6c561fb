//! Opaque random tokens and their storage digests.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind every session token and challenge.
pub const TOKEN_BYTES: usize = 32;

/// Encoded length of a `TOKEN_BYTES` value without padding.
const ENCODED_LEN: usize = 43;

/// 256 bits from the OS-seeded thread RNG, base64url without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest; the only form of a session token that is persisted.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Cheap shape check before any storage lookup.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == ENCODED_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
