//! EVM account addresses.

use crate::auth::error::AuthError;
use std::fmt;

/// A 20-byte account identifier.
///
/// `normalized` is the lowercase form used as a store key. `original` is the
/// exact string the caller submitted, which challenge messages echo back so
/// the client signs what it expects to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    normalized: String,
    original: String,
}

impl Address {
    /// Parse a `0x`-prefixed, 40 hex digit address.
    pub fn parse(input: &str) -> Result<Self, AuthError> {
        let trimmed = input.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AuthError::InvalidAddress("must start with 0x".to_string()))?;

        if hex_part.len() != 40 {
            return Err(AuthError::InvalidAddress(format!(
                "expected 40 hex characters, got {}",
                hex_part.len()
            )));
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AuthError::InvalidAddress(
                "contains non-hex characters".to_string(),
            ));
        }

        Ok(Self {
            normalized: format!("0x{}", hex_part.to_ascii_lowercase()),
            original: format!("0x{}", hex_part),
        })
    }

    /// Build an address from raw bytes (e.g. a recovered signer).
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        let normalized = format!("0x{}", hex::encode(bytes));
        Self {
            original: normalized.clone(),
            normalized,
        }
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// Raw 20 bytes of the address.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated as 40 hex digits in every constructor.
        if let Ok(decoded) = hex::decode(&self.normalized[2..]) {
            out.copy_from_slice(&decoded);
        }
        out
    }

    /// Case-insensitive equality against another address.
    pub fn matches(&self, other: &Address) -> bool {
        self.normalized == other.normalized
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Shorten an address for logs: `0x1234…abcd`.
///
/// Strings too short to truncate are returned unchanged.
pub fn truncate_address(address: &str) -> String {
    if address.len() <= 12 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}
