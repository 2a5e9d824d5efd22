//! PIN hashing for the fallback authenticator.
//!
//! PINs are hashed with Argon2id into a PHC string. Hashing and verifying are
//! CPU-bound, so both run on the blocking pool.

use super::error::AuthError;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;
use zeroize::Zeroizing;

pub const MIN_PIN_LENGTH: usize = 4;
pub const MAX_PIN_LENGTH: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum PinHashError {
    #[error("Argon2 hash: {0}")]
    Hash(String),

    #[error("Hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// PIN must be 4-12 ASCII digits.
pub fn validate_pin(pin: &str) -> Result<(), AuthError> {
    let len_ok = (MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&pin.len());
    if !len_ok || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AuthError::InvalidPinFormat);
    }
    Ok(())
}

fn hash_blocking(pin: &[u8]) -> Result<String, PinHashError> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| PinHashError::Hash(e.to_string()))?;

    Argon2::default()
        .hash_password(pin, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PinHashError::Hash(e.to_string()))
}

fn verify_blocking(pin: &[u8], pin_hash: &str) -> Result<bool, PinHashError> {
    let parsed = PasswordHash::new(pin_hash).map_err(|e| PinHashError::Hash(e.to_string()))?;
    Ok(Argon2::default().verify_password(pin, &parsed).is_ok())
}

/// Hash a PIN into an Argon2id PHC string with a random salt.
pub async fn hash_pin(pin: &str) -> Result<String, PinHashError> {
    let pin = Zeroizing::new(pin.as_bytes().to_vec());
    tokio::task::spawn_blocking(move || hash_blocking(&pin)).await?
}

/// Check a PIN against a stored PHC string.
///
/// A stored hash that cannot be parsed is an error, not a mismatch.
pub async fn verify_pin(pin: &str, pin_hash: &str) -> Result<bool, PinHashError> {
    let pin = Zeroizing::new(pin.as_bytes().to_vec());
    let pin_hash = pin_hash.to_string();
    tokio::task::spawn_blocking(move || verify_blocking(&pin, &pin_hash)).await?
}
