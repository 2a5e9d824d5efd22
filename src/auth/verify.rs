//! Wallet signature verification.
//!
//! Supports three proof shapes over the EIP-191 personal-message digest:
//! - plain 65-byte ECDSA signatures from externally owned accounts
//! - ERC-6492 wrapped signatures from smart-contract wallets
//! - bare ERC-1271 signatures from deployed contract wallets
//!
//! ECDSA recovery is always tried first. Contract paths need a [`ChainReader`].
//! Verification never fails with an error type: every outcome is a
//! [`VerificationResult`] so callers can log why a proof was rejected.

use crate::auth::address::Address;
use crate::auth::chain::ChainReader;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use sha3::{Digest, Keccak256};
use std::sync::Arc;

/// 32-byte suffix marking an ERC-6492 wrapped signature (`0x6492` repeated).
pub const ERC6492_MAGIC_SUFFIX: [u8; 32] = [
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64,
    0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
    0x64, 0x92,
];

/// `isValidSignature(bytes32,bytes)` selector, also the ERC-1271 success value.
pub const ERC1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    Eoa,
    Erc6492,
    Erc1271,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::Eoa => "eoa",
            VerificationMethod::Erc6492 => "erc6492",
            VerificationMethod::Erc1271 => "erc1271",
        }
    }
}

/// Why a signature was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyFailure {
    #[error("invalid signature format: {0}")]
    InvalidFormat(String),

    #[error("recovered signer does not match claimed address")]
    SignerMismatch,

    /// Counterfactual wallets must be deployed before they can sign in.
    #[error("no contract deployed at claimed address")]
    NotDeployed,

    #[error("contract rejected signature")]
    ContractRejected,

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub valid: bool,
    pub method: VerificationMethod,
    pub is_contract_account: bool,
    /// Address that produced the signature, when `valid`.
    pub signer: Option<Address>,
    pub error: Option<VerifyFailure>,
}

impl VerificationResult {
    fn success(method: VerificationMethod, is_contract_account: bool, signer: Address) -> Self {
        Self {
            valid: true,
            method,
            is_contract_account,
            signer: Some(signer),
            error: None,
        }
    }

    fn failure(
        method: VerificationMethod,
        is_contract_account: bool,
        error: VerifyFailure,
    ) -> Self {
        Self {
            valid: false,
            method,
            is_contract_account,
            signer: None,
            error: Some(error),
        }
    }
}

/// Verifies wallet signatures, consulting the chain for contract accounts.
#[derive(Clone, Default)]
pub struct SignatureVerifier {
    chain: Option<Arc<dyn ChainReader>>,
}

impl SignatureVerifier {
    pub fn new(chain: Option<Arc<dyn ChainReader>>) -> Self {
        Self { chain }
    }

    /// Verify that `signature` over `message` was produced by `claimed`.
    ///
    /// ERC-6492 wrapped signatures are checked against the deployed wallet
    /// only. The factory call in the wrapper is never executed, so a wallet
    /// that has not been deployed yet fails with
    /// [`VerifyFailure::NotDeployed`].
    pub async fn verify(
        &self,
        message: &str,
        signature: &str,
        claimed: &Address,
    ) -> VerificationResult {
        let bytes = match decode_signature(signature) {
            Ok(bytes) => bytes,
            Err(e) => {
                return VerificationResult::failure(
                    VerificationMethod::Eoa,
                    false,
                    VerifyFailure::InvalidFormat(e),
                )
            }
        };

        let digest = hash_personal_message(message.as_bytes());
        let wrapped = is_erc6492(&bytes);

        let eoa_failure = if wrapped {
            VerifyFailure::SignerMismatch
        } else {
            match recover_signer(&digest, &bytes) {
                Ok(signer) if signer.matches(claimed) => {
                    return VerificationResult::success(VerificationMethod::Eoa, false, signer);
                }
                Ok(_) => VerifyFailure::SignerMismatch,
                Err(failure) => failure,
            }
        };

        self.verify_contract(&digest, &bytes, wrapped, claimed, eoa_failure)
            .await
    }

    async fn verify_contract(
        &self,
        digest: &[u8; 32],
        bytes: &[u8],
        wrapped: bool,
        claimed: &Address,
        eoa_failure: VerifyFailure,
    ) -> VerificationResult {
        let method = if wrapped {
            VerificationMethod::Erc6492
        } else {
            VerificationMethod::Erc1271
        };

        let inner = if wrapped {
            match decode_erc6492(&bytes[..bytes.len() - ERC6492_MAGIC_SUFFIX.len()]) {
                Ok(parts) => parts.inner_signature,
                Err(e) => {
                    return VerificationResult::failure(
                        method,
                        false,
                        VerifyFailure::InvalidFormat(e),
                    )
                }
            }
        } else {
            bytes.to_vec()
        };

        let Some(chain) = &self.chain else {
            return if wrapped {
                VerificationResult::failure(
                    method,
                    false,
                    VerifyFailure::ChainUnavailable("no chain reader configured".to_string()),
                )
            } else {
                VerificationResult::failure(VerificationMethod::Eoa, false, eoa_failure)
            };
        };

        let code = match chain.get_code(claimed).await {
            Ok(code) => code,
            Err(e) if wrapped => {
                return VerificationResult::failure(
                    method,
                    false,
                    VerifyFailure::ChainUnavailable(e.to_string()),
                )
            }
            Err(e) => {
                tracing::debug!(error = %e, "Contract code lookup failed");
                return VerificationResult::failure(VerificationMethod::Eoa, false, eoa_failure);
            }
        };

        if code.is_empty() {
            return if wrapped {
                VerificationResult::failure(method, false, VerifyFailure::NotDeployed)
            } else {
                VerificationResult::failure(VerificationMethod::Eoa, false, eoa_failure)
            };
        }

        let calldata = encode_is_valid_signature(digest, &inner);
        match chain.call(claimed, &calldata).await {
            Ok(result) if result.len() >= 4 && result[..4] == ERC1271_MAGIC_VALUE => {
                VerificationResult::success(method, true, claimed.clone())
            }
            Ok(_) => VerificationResult::failure(method, true, VerifyFailure::ContractRejected),
            Err(e) => VerificationResult::failure(
                method,
                true,
                VerifyFailure::ChainUnavailable(e.to_string()),
            ),
        }
    }
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// EIP-191 personal-message digest.
pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Recover the signing address from a 65-byte `r || s || v` signature.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> Result<Address, VerifyFailure> {
    if signature.len() != 65 {
        return Err(VerifyFailure::InvalidFormat(format!(
            "expected 65 bytes, got {}",
            signature.len()
        )));
    }

    let (rs, v) = signature.split_at(64);
    let y_odd = match v[0] {
        0 | 27 => false,
        1 | 28 => true,
        other => {
            return Err(VerifyFailure::InvalidFormat(format!(
                "invalid recovery id {}",
                other
            )))
        }
    };

    let mut sig = Signature::from_slice(rs)
        .map_err(|e| VerifyFailure::InvalidFormat(format!("invalid ECDSA signature: {}", e)))?;
    let mut recovery_id = RecoveryId::new(y_odd, false);

    // High-S signatures are rejected by k256; flip to the canonical form.
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!y_odd, false);
    }

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| VerifyFailure::SignerMismatch)?;

    Ok(address_from_verifying_key(&key))
}

/// EVM address of a secp256k1 public key.
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(&bytes)
}

/// EVM address of a hex-encoded secp256k1 private key.
pub fn address_from_private_key(private_key_hex: &str) -> Result<Address, String> {
    let key = parse_signing_key(private_key_hex)?;
    Ok(address_from_verifying_key(key.verifying_key()))
}

/// Sign `message` as an EIP-191 personal message, returning `0x`-hex `r || s || v`.
pub fn sign_personal_message(key: &SigningKey, message: &str) -> Result<String, String> {
    let digest = hash_personal_message(message.as_bytes());
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| format!("signing failed: {}", e))?;

    let mut out = sig.to_bytes().to_vec();
    out.push(27 + recovery_id.to_byte());
    Ok(format!("0x{}", hex::encode(out)))
}

/// Parse a hex-encoded (optionally `0x`-prefixed) secp256k1 private key.
pub fn parse_signing_key(private_key_hex: &str) -> Result<SigningKey, String> {
    let trimmed = private_key_hex.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = zeroize::Zeroizing::new(
        hex::decode(digits).map_err(|e| format!("invalid private key hex: {}", e))?,
    );
    SigningKey::from_slice(&bytes).map_err(|e| format!("invalid private key: {}", e))
}

fn decode_signature(signature: &str) -> Result<Vec<u8>, String> {
    let trimmed = signature.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.is_empty() {
        return Err("empty signature".to_string());
    }
    hex::decode(digits).map_err(|e| format!("invalid hex: {}", e))
}

fn is_erc6492(bytes: &[u8]) -> bool {
    bytes.len() > ERC6492_MAGIC_SUFFIX.len()
        && bytes[bytes.len() - ERC6492_MAGIC_SUFFIX.len()..] == ERC6492_MAGIC_SUFFIX
}

/// Decoded `(address factory, bytes factoryCalldata, bytes innerSig)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc6492Parts {
    pub factory: [u8; 20],
    pub factory_calldata: Vec<u8>,
    pub inner_signature: Vec<u8>,
}

/// ABI-decode the ERC-6492 wrapper body (without the magic suffix).
pub fn decode_erc6492(body: &[u8]) -> Result<Erc6492Parts, String> {
    if body.len() < 96 {
        return Err("ERC-6492 wrapper shorter than its head".to_string());
    }
    if body[..12].iter().any(|b| *b != 0) {
        return Err("ERC-6492 factory is not a padded address".to_string());
    }

    let mut factory = [0u8; 20];
    factory.copy_from_slice(&body[12..32]);

    let calldata_offset =
        read_word(&body[32..64]).ok_or("ERC-6492 calldata offset out of range")?;
    let signature_offset =
        read_word(&body[64..96]).ok_or("ERC-6492 signature offset out of range")?;

    Ok(Erc6492Parts {
        factory,
        factory_calldata: read_dynamic_bytes(body, calldata_offset)
            .ok_or("ERC-6492 calldata truncated")?,
        inner_signature: read_dynamic_bytes(body, signature_offset)
            .ok_or("ERC-6492 inner signature truncated")?,
    })
}

/// ABI-encode an ERC-6492 wrapped signature, including the magic suffix.
pub fn encode_erc6492(factory: &[u8; 20], factory_calldata: &[u8], inner: &[u8]) -> Vec<u8> {
    let calldata_offset = 96;
    let signature_offset = calldata_offset + 32 + padded_len(factory_calldata.len());

    let mut out = Vec::new();
    let mut factory_word = [0u8; 32];
    factory_word[12..].copy_from_slice(factory);
    out.extend_from_slice(&factory_word);
    out.extend_from_slice(&word(calldata_offset));
    out.extend_from_slice(&word(signature_offset));
    append_dynamic_bytes(&mut out, factory_calldata);
    append_dynamic_bytes(&mut out, inner);
    out.extend_from_slice(&ERC6492_MAGIC_SUFFIX);
    out
}

/// Calldata for `isValidSignature(bytes32 hash, bytes signature)`.
pub fn encode_is_valid_signature(hash: &[u8; 32], signature: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 96 + padded_len(signature.len()));
    out.extend_from_slice(&ERC1271_MAGIC_VALUE);
    out.extend_from_slice(hash);
    out.extend_from_slice(&word(64));
    append_dynamic_bytes(&mut out, signature);
    out
}

fn word(value: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&(value as u64).to_be_bytes());
    out
}

fn read_word(bytes: &[u8]) -> Option<usize> {
    if bytes.len() != 32 || bytes[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[24..]);
    usize::try_from(u64::from_be_bytes(buf)).ok()
}

fn read_dynamic_bytes(body: &[u8], offset: usize) -> Option<Vec<u8>> {
    let len_end = offset.checked_add(32)?;
    let len = read_word(body.get(offset..len_end)?)?;
    let data_end = len_end.checked_add(len)?;
    body.get(len_end..data_end).map(<[u8]>::to_vec)
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(32) * 32
}

fn append_dynamic_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&word(data.len()));
    out.extend_from_slice(data);
    out.resize(out.len() + padded_len(data.len()) - data.len(), 0);
}
