//! Short identifier generation and custom slug validation.
//!
//! Generated ids are drawn from a 62-symbol alphabet with the thread-local
//! CSPRNG, so a 6-character id carries ~35.7 bits of entropy
//! (62^6 ≈ 5.68 × 10^10 combinations). Uniqueness against the store is
//! enforced by the caller, which retries on conflict.

use rand::RngExt;

pub const DEFAULT_ID_LENGTH: usize = 6;
pub const MAX_SLUG_LENGTH: usize = 64;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Paths served by the redirect server itself; a slug may not shadow them.
const RESERVED_SLUGS: &[&str] = &["health", "api", "ws"];

/// Generate a random alphanumeric identifier of `length` characters that is
/// never one of the reserved paths.
pub fn generate(length: usize) -> String {
    let mut rng = rand::rng();
    loop {
        let id: String = (0..length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        if !is_reserved(&id) {
            return id;
        }
    }
}

pub fn is_reserved(id: &str) -> bool {
    RESERVED_SLUGS.contains(&id)
}

/// Accepts only non-empty `[A-Za-z0-9_-]+` of at most [`MAX_SLUG_LENGTH`] characters.
pub fn validate_custom_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LENGTH
        && slug
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        && !is_reserved(slug)
}
