//! Authentication error taxonomy.
//!
//! Every variant is recoverable by restarting the protocol from the
//! challenge step. `code()` is the stable identifier sent to clients.

use crate::auth::pin::PinHashError;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No outstanding challenge for this address")]
    NoChallenge,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Nonce does not match the outstanding challenge")]
    NonceMismatch,

    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Signature was not produced by the claimed address")]
    SignatureAddressMismatch,

    #[error("PIN locked, retry in {seconds_remaining}s")]
    PinLocked { seconds_remaining: u64 },

    #[error("Invalid PIN, {attempts_remaining} attempts remaining")]
    PinInvalid { attempts_remaining: u32 },

    #[error("No PIN configured for this address")]
    PinNotSet,

    #[error("PIN must be 4-12 digits")]
    InvalidPinFormat,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Privileged address is not configured")]
    NotConfigured,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Sign-in message is malformed or not addressed to this service")]
    MalformedMessage,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("PIN hashing failed: {0}")]
    Hashing(#[from] PinHashError),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NoChallenge => "NO_CHALLENGE",
            AuthError::ChallengeExpired => "CHALLENGE_EXPIRED",
            AuthError::NonceMismatch => "NONCE_MISMATCH",
            AuthError::InvalidSignatureFormat(_) => "INVALID_SIGNATURE_FORMAT",
            AuthError::SignatureAddressMismatch => "SIGNATURE_ADDRESS_MISMATCH",
            AuthError::PinLocked { .. } => "PIN_LOCKED",
            AuthError::PinInvalid { .. } => "PIN_INVALID",
            AuthError::PinNotSet => "PIN_NOT_SET",
            AuthError::InvalidPinFormat => "INVALID_PIN_FORMAT",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::SessionNotFound => "SESSION_NOT_FOUND",
            AuthError::NotConfigured => "NOT_CONFIGURED",
            AuthError::InvalidAddress(_) => "INVALID_ADDRESS",
            AuthError::MalformedMessage => "MALFORMED_MESSAGE",
            AuthError::Storage(_) | AuthError::Hashing(_) => "INTERNAL",
        }
    }
}
