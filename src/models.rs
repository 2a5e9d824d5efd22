//! Request and response models for the API.
//!
//! All models use serde for serialization/deserialization.
//! Storage models represent what the store backends persist.

use serde::{Deserialize, Serialize};

// ============================================================================
// Auth Models
// ============================================================================

/// Request for a login or admin challenge.
#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub address: String,
}

/// Challenge nonce plus the exact message the wallet must sign.
#[derive(Debug, Serialize)]
pub struct ChallengeResponse {
    pub nonce: String,
    pub message: String,
    pub expires_in: u64,
}

/// Request to verify a signed challenge.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub address: String,
    pub nonce: String,
    pub signature: String, // 0x-hex
}

/// Request to verify a client-formatted sign-in message.
#[derive(Debug, Deserialize)]
pub struct StructuredVerifyRequest {
    pub address: String,
    pub message: String,
    pub signature: String, // 0x-hex
}

/// Response after a successful login (signature or PIN).
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub identity: Identity,
    pub expires_in: u64,
}

/// Response after a successful admin verification.
#[derive(Debug, Serialize)]
pub struct AdminVerifyResponse {
    pub session_token: String,
    pub expires_in: u64,
}

/// Outcome of a privilege check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PrivilegeCheck {
    pub is_privileged: bool,
    pub reason: String,
}

/// Current session details for the bearer.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub wallet: String,
    pub kind: SessionKind,
    pub expires_at: u64,
}

// ============================================================================
// PIN Models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PinSetupRequest {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct PinVerifyRequest {
    pub address: String,
    pub pin: String,
}

// ============================================================================
// Admin Models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

// ============================================================================
// Storage Models
// ============================================================================

/// Outstanding challenge, keyed by normalized address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChallenge {
    pub nonce: String,
    pub issued_at: u64,
    pub original_address: String,
}

/// Session data, keyed by token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub wallet: String,
    pub kind: SessionKind,
    pub verified_at: u64,
    pub expires_at: u64,
}

/// Hashed PIN with lockout state, keyed by normalized address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCredential {
    pub address: String,
    pub pin_hash: String,
    pub failed_attempts: u32,
    #[serde(default)]
    pub locked_until: Option<u64>,
}

/// Application identity for a wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub address: String,
    pub created_at: u64,
    pub last_login_at: u64,
}

// ============================================================================
// Session Kinds
// ============================================================================

/// Which protocol minted a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// General login (signature, sign-in message, or PIN).
    App,
    /// Privileged verification.
    Trust,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::App => "app",
            SessionKind::Trust => "trust",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(SessionKind::App),
            "trust" => Ok(SessionKind::Trust),
            _ => Err(format!("Invalid session kind: {}", s)),
        }
    }
}
