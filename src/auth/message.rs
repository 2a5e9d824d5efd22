//! Challenge message text.
//!
//! Messages are rebuilt byte-for-byte from stored challenge state when a
//! signature comes back, so the builders here must be deterministic.

use regex::Regex;
use std::sync::LazyLock;

static NONCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Nonce: ([A-Za-z0-9]{8,})\r?$").expect("invalid nonce pattern")
});

static ADDRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(0x[0-9a-fA-F]{40})\r?$").expect("invalid address pattern")
});

static DOMAIN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A(\S+) wants you to sign in with your wallet:\r?\n")
        .expect("invalid domain pattern")
});

static ISSUED_AT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Issued At: ([0-9]{1,20})\r?$").expect("invalid issued-at pattern")
});

static CHAIN_ID_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Chain ID: ([0-9]{1,20})\r?$").expect("invalid chain id pattern")
});

/// Fixed values embedded in every sign-in message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub domain: String,
    pub uri: String,
    pub chain_id: u64,
}

impl MessageContext {
    /// Sign-in message for the general login protocol.
    pub fn login_message(&self, original_address: &str, nonce: &str, issued_at: u64) -> String {
        format!(
            "{domain} wants you to sign in with your wallet:\n\
             {address}\n\
             \n\
             Sign in to {domain}. This request will not trigger a blockchain transaction or cost any gas.\n\
             \n\
             URI: {uri}\n\
             Version: 1\n\
             Chain ID: {chain_id}\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}",
            domain = self.domain,
            address = original_address,
            uri = self.uri,
            chain_id = self.chain_id,
            nonce = nonce,
            issued_at = issued_at,
        )
    }

    /// Message for the privileged verification protocol.
    pub fn admin_message(&self, original_address: &str, nonce: &str, issued_at: u64) -> String {
        format!(
            "{domain} admin verification\n\
             Address: {address}\n\
             Nonce: {nonce}\n\
             Timestamp: {issued_at}",
            domain = self.domain,
            address = original_address,
            nonce = nonce,
            issued_at = issued_at,
        )
    }
}

/// Nonce embedded in a client-formatted sign-in message.
///
/// Exactly one `Nonce:` line is accepted; zero or several is malformed.
pub fn extract_nonce(message: &str) -> Option<&str> {
    let mut captures = NONCE_LINE.captures_iter(message);
    let first = captures.next()?.get(1)?.as_str();
    if captures.next().is_some() {
        return None;
    }
    Some(first)
}

/// Address line of a sign-in message, if present.
pub fn extract_address(message: &str) -> Option<&str> {
    ADDRESS_LINE
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Domain from the first line of a sign-in message.
///
/// Only the `{domain} wants you to sign in with your wallet:` form is
/// recognised, so privileged-verification text never parses as a login.
pub fn extract_domain(message: &str) -> Option<&str> {
    DOMAIN_LINE
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// `Issued At:` timestamp in UNIX seconds. Several lines are malformed.
pub fn extract_issued_at(message: &str) -> Option<u64> {
    single_number(&ISSUED_AT_LINE, message)
}

/// `Chain ID:` value. Several lines are malformed.
pub fn extract_chain_id(message: &str) -> Option<u64> {
    single_number(&CHAIN_ID_LINE, message)
}

fn single_number(pattern: &Regex, message: &str) -> Option<u64> {
    let mut captures = pattern.captures_iter(message);
    let first = captures.next()?.get(1)?.as_str().parse().ok()?;
    if captures.next().is_some() {
        return None;
    }
    Some(first)
}
