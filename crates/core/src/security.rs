//! Security utilities for the gateway
//!
//! This module provides security-related functionality including:
//! - Token secret generation and Argon2id hashing
//! - Cache fingerprints for validated secrets

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Number of random bytes behind each issued token secret.
pub const SECRET_ENTROPY_BYTES: usize = 32;

/// Generate a fresh token secret for the token row `id`.
///
/// The secret is `"<id>.<base64url(32 random bytes)>"`: opaque and URL-safe
/// for callers, while the id prefix lets validation fetch the row directly
/// instead of scanning every stored hash.
pub fn generate_secret(id: i64) -> String {
    let mut bytes = [0u8; SECRET_ENTROPY_BYTES];
    rand::rng().fill(&mut bytes[..]);
    format!("{}.{}", id, URL_SAFE_NO_PAD.encode(bytes))
}

/// Split a presented secret into its token id and opaque remainder.
pub fn parse_secret(secret: &str) -> Option<i64> {
    let (id, rest) = secret.split_once('.')?;
    if rest.is_empty() {
        return None;
    }
    id.parse().ok()
}

/// Hash a token secret using Argon2id
///
/// Uses secure defaults:
/// - Memory: 19456 KiB (19 MiB)
/// - Iterations: 2
/// - Parallelism: 1
/// - Output length: 32 bytes
///
/// # Errors
/// Returns an error if hashing fails
pub fn hash_secret(secret: &str) -> Result<String> {
    use argon2::{
        Argon2,
        password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash secret: {}", e))?;

    Ok(hash.to_string())
}

/// Verify a token secret against an Argon2id hash
///
/// # Returns
/// `Ok(true)` if the secret matches, `Ok(false)` if it doesn't
///
/// # Errors
/// Returns an error if the hash is malformed
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool> {
    use argon2::{
        Argon2,
        password_hash::{PasswordHash, PasswordVerifier},
    };

    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse secret hash: {}", e))?;

    let argon2 = Argon2::default();

    Ok(argon2
        .verify_password(secret.as_bytes(), &parsed_hash)
        .is_ok())
}

/// SHA-256 fingerprint of a secret, used as the auth-cache key so the
/// plaintext never sits in the cache.
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
