//! Authentication orchestrator.
//!
//! [`Authenticator`] drives the three protocols on top of the injected stores:
//!
//! 1. **General login**: challenge, signature, app session. A variant accepts
//!    a client-formatted sign-in message instead of the server's.
//! 2. **Privileged verification**: a separate challenge namespace with a
//!    shorter TTL that mints a trust session. [`Authenticator::check_privilege`]
//!    answers whether a bearer token currently holds privilege.
//! 3. **PIN fallback**: Argon2id-hashed PIN with failure counting and lockout.
//!
//! Every state transition is written to the [`AuditLog`]. Failures carry the
//! `step` that rejected them.
//!
//! Stores return owned snapshots, so no lock is ever held while the signature
//! verifier talks to the chain.

use crate::auth::address::Address;
use crate::auth::audit::AuditLog;
use crate::auth::clock::Clock;
use crate::auth::error::AuthError;
use crate::auth::message::{
    extract_address, extract_chain_id, extract_domain, extract_issued_at, extract_nonce,
    MessageContext,
};
use crate::auth::pin::{hash_pin, validate_pin, verify_pin};
use crate::auth::session::{generate_challenge_nonce, generate_session_token};
use crate::auth::verify::{SignatureVerifier, VerificationResult, VerifyFailure};
use crate::models::{
    AdminVerifyResponse, ChallengeResponse, LoginResponse, PinCredential, PrivilegeCheck,
    SessionKind, StoredChallenge, StoredSession,
};
use crate::storage::{ChallengeStore, ConsumeOutcome, IssueOutcome, PinAttempt, Stores};
use std::sync::Arc;

/// How far a sign-in message's `Issued At` may run ahead of the server clock.
pub const MESSAGE_CLOCK_SKEW_SECS: u64 = 30;

/// Tunables for the authenticator.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub message: MessageContext,
    pub challenge_ttl_secs: u64,
    pub admin_challenge_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub trust_session_ttl_secs: u64,
    /// The one address that holds privilege. `None` disables the
    /// privileged protocol.
    pub admin_address: Option<Address>,
    /// Accept a signed sign-in message when no challenge is outstanding.
    pub allow_unbound_structured_login: bool,
    pub pin_max_attempts: u32,
    pub pin_lockout_secs: u64,
    pub audit_capacity: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            message: MessageContext {
                domain: "localhost".to_string(),
                uri: "http://localhost:3000".to_string(),
                chain_id: 1,
            },
            challenge_ttl_secs: 300,
            admin_challenge_ttl_secs: 60,
            session_ttl_secs: 86_400,
            trust_session_ttl_secs: 900,
            admin_address: None,
            allow_unbound_structured_login: true,
            pin_max_attempts: 5,
            pin_lockout_secs: 900,
            audit_capacity: 1000,
        }
    }
}

/// Counts removed by one [`Authenticator::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub challenges: usize,
    pub admin_challenges: usize,
    pub sessions: usize,
    pub trust_sessions: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.challenges + self.admin_challenges + self.sessions + self.trust_sessions
    }
}

/// The two challenge namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Login,
    Privileged,
}

impl Protocol {
    fn event(&self, suffix: &str) -> String {
        match self {
            Protocol::Login => format!("challenge_{}", suffix),
            Protocol::Privileged => format!("admin_challenge_{}", suffix),
        }
    }

    fn failure_event(&self) -> &'static str {
        match self {
            Protocol::Login => "login_failed",
            Protocol::Privileged => "admin_verify_failed",
        }
    }
}

pub struct Authenticator {
    settings: AuthSettings,
    stores: Stores,
    verifier: SignatureVerifier,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl Authenticator {
    pub fn new(
        settings: AuthSettings,
        stores: Stores,
        verifier: SignatureVerifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let audit = AuditLog::new(settings.audit_capacity, clock.clone());
        Self {
            settings,
            stores,
            verifier,
            clock,
            audit,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn now(&self) -> u64 {
        self.clock.now_secs()
    }

    // ========================================================================
    // General login
    // ========================================================================

    /// Issue (or reuse) a login challenge for `address`.
    pub async fn issue_challenge(&self, address: &str) -> Result<ChallengeResponse, AuthError> {
        let address = self.parse_address(address, "challenge_failed")?;
        self.issue(Protocol::Login, &address).await
    }

    /// Verify a signature over the server-built login message.
    pub async fn verify_login(
        &self,
        address: &str,
        nonce: &str,
        signature: &str,
    ) -> Result<LoginResponse, AuthError> {
        let address = self.parse_address(address, "login_failed")?;
        let challenge = self.consume(Protocol::Login, &address, nonce).await?;

        let message = self.settings.message.login_message(
            &challenge.original_address,
            &challenge.nonce,
            challenge.issued_at,
        );
        let result = self.verifier.verify(&message, signature, &address).await;
        if !result.valid {
            return Err(self.signature_rejected(Protocol::Login, &address, &result, "signature"));
        }

        self.complete_login(&address, "signature", Some(&result))
            .await
    }

    /// Verify a signature over a client-formatted sign-in message.
    ///
    /// The message is verified verbatim. It must be addressed to this
    /// service's domain (and chain, if it names one). Its nonce must belong
    /// to an outstanding challenge for `address`, unless unbound sign-in is
    /// enabled and no challenge exists. An unbound message must also carry a
    /// recent `Issued At`, and its nonce is spent on success so it can never
    /// be replayed.
    pub async fn verify_structured_message(
        &self,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<LoginResponse, AuthError> {
        let address = self.parse_address(address, "login_failed")?;

        let reject = |step: &str, err: AuthError| {
            self.audit.record(
                "login_failed",
                [
                    ("flow", "siwe".to_string()),
                    ("step", step.to_string()),
                    ("address", address.normalized().to_string()),
                    ("code", err.code().to_string()),
                ],
            );
            err
        };

        let Some(nonce) = extract_nonce(message) else {
            return Err(reject("extract_nonce", AuthError::MalformedMessage));
        };

        if let Some(line) = extract_address(message) {
            let bound = Address::parse(line).map_err(|_| AuthError::MalformedMessage)?;
            if !bound.matches(&address) {
                self.audit.record(
                    "login_failed",
                    [
                        ("flow", "siwe".to_string()),
                        ("step", "message_address".to_string()),
                        ("address", address.normalized().to_string()),
                        ("claimed", bound.normalized().to_string()),
                    ],
                );
                return Err(AuthError::SignatureAddressMismatch);
            }
        }

        let ctx = &self.settings.message;
        if !extract_domain(message).is_some_and(|d| d.eq_ignore_ascii_case(&ctx.domain)) {
            return Err(reject("message_domain", AuthError::MalformedMessage));
        }
        if extract_chain_id(message).is_some_and(|id| id != ctx.chain_id) {
            return Err(reject("message_chain_id", AuthError::MalformedMessage));
        }

        let now = self.now();
        let issued_at = extract_issued_at(message);
        if issued_at.is_some_and(|t| t > now.saturating_add(MESSAGE_CLOCK_SKEW_SECS)) {
            return Err(reject("issued_at", AuthError::MalformedMessage));
        }

        match self.consume_outcome(Protocol::Login, &address, nonce).await? {
            ConsumeOutcome::Consumed(_) => {}
            ConsumeOutcome::NoChallenge if self.settings.allow_unbound_structured_login => {
                let Some(issued_at) = issued_at else {
                    return Err(reject("issued_at", AuthError::MalformedMessage));
                };
                if now.saturating_sub(issued_at) > self.settings.challenge_ttl_secs {
                    return Err(reject("issued_at", AuthError::ChallengeExpired));
                }

                let result = self.verifier.verify(message, signature, &address).await;
                if !result.valid {
                    return Err(self.signature_rejected(Protocol::Login, &address, &result, "siwe"));
                }
                if !self.spend_login_nonce(nonce, now).await? {
                    return Err(reject("spent_nonce", AuthError::NoChallenge));
                }

                self.audit.record(
                    "siwe_unbound_verify",
                    [("address", address.normalized().to_string())],
                );
                return self.complete_login(&address, "siwe", Some(&result)).await;
            }
            other => {
                return Err(self.consume_rejected(Protocol::Login, &address, other));
            }
        }

        let result = self.verifier.verify(message, signature, &address).await;
        if !result.valid {
            return Err(self.signature_rejected(Protocol::Login, &address, &result, "siwe"));
        }

        self.complete_login(&address, "siwe", Some(&result)).await
    }

    /// Look up a live app session by bearer token.
    pub async fn resolve_app_session(&self, token: &str) -> Result<StoredSession, AuthError> {
        let session = self
            .stores
            .sessions
            .get(token)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if session.kind != SessionKind::App {
            return Err(AuthError::SessionNotFound);
        }
        if self.now() > session.expires_at {
            self.stores.sessions.remove(token).await?;
            return Err(AuthError::SessionExpired);
        }
        Ok(session)
    }

    /// Delete an app session. Returns whether it existed.
    pub async fn revoke_app_session(&self, token: &str) -> Result<bool, AuthError> {
        let session = self.stores.sessions.get(token).await?;
        let removed = self.stores.sessions.remove(token).await?;
        if let Some(session) = session {
            self.audit
                .record("logout", [("wallet", session.wallet), ("kind", "app".to_string())]);
        }
        Ok(removed)
    }

    // ========================================================================
    // Privileged verification
    // ========================================================================

    /// Issue (or reuse) a privileged challenge for `address`.
    pub async fn issue_privileged_challenge(
        &self,
        address: &str,
    ) -> Result<ChallengeResponse, AuthError> {
        self.require_admin_configured("admin_challenge_failed")?;
        let address = self.parse_address(address, "admin_challenge_failed")?;
        self.issue(Protocol::Privileged, &address).await
    }

    /// Verify a privileged challenge and mint a trust session for the signer.
    ///
    /// The session is bound to whoever signed. Privilege itself is decided
    /// later by [`check_privilege`](Self::check_privilege).
    pub async fn verify_privileged(
        &self,
        address: &str,
        nonce: &str,
        signature: &str,
    ) -> Result<AdminVerifyResponse, AuthError> {
        let admin = self.require_admin_configured("admin_verify_failed")?;
        let address = self.parse_address(address, "admin_verify_failed")?;
        let challenge = self.consume(Protocol::Privileged, &address, nonce).await?;

        let message = self.settings.message.admin_message(
            &challenge.original_address,
            &challenge.nonce,
            challenge.issued_at,
        );
        let result = self.verifier.verify(&message, signature, &address).await;
        if !result.valid {
            return Err(self.signature_rejected(
                Protocol::Privileged,
                &address,
                &result,
                "signature",
            ));
        }

        let signer = result.signer.clone().unwrap_or_else(|| address.clone());
        let is_admin = signer.matches(admin);
        let session = self
            .mint_session(signer.normalized(), SessionKind::Trust)
            .await?;

        self.audit.record(
            "admin_verify_success",
            [
                ("signer", signer.normalized().to_string()),
                ("method", result.method.as_str().to_string()),
                ("is_privileged", is_admin.to_string()),
            ],
        );

        Ok(AdminVerifyResponse {
            session_token: session.token,
            expires_in: self.settings.trust_session_ttl_secs,
        })
    }

    /// Whether `token` names a live trust session for the configured address.
    ///
    /// Only the trust-session store is consulted; app sessions never grant
    /// privilege.
    pub async fn check_privilege(&self, token: Option<&str>) -> Result<PrivilegeCheck, AuthError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(self.privilege_denied("missing_token", None));
        };
        let Some(admin) = &self.settings.admin_address else {
            return Ok(self.privilege_denied("not_configured", None));
        };

        let Some(session) = self.stores.trust_sessions.get(token).await? else {
            return Ok(self.privilege_denied("session_not_found", None));
        };

        if self.now() > session.expires_at {
            self.stores.trust_sessions.remove(token).await?;
            return Ok(self.privilege_denied("session_expired", Some(&session.wallet)));
        }
        if session.kind != SessionKind::Trust {
            return Ok(self.privilege_denied("session_not_found", Some(&session.wallet)));
        }
        if session.wallet != admin.normalized() {
            return Ok(self.privilege_denied("not_privileged", Some(&session.wallet)));
        }

        Ok(PrivilegeCheck {
            is_privileged: true,
            reason: "ok".to_string(),
        })
    }

    /// Delete a trust session. Returns whether it existed.
    pub async fn revoke_privileged(&self, token: &str) -> Result<bool, AuthError> {
        let session = self.stores.trust_sessions.get(token).await?;
        let removed = self.stores.trust_sessions.remove(token).await?;
        if let Some(session) = session {
            self.audit.record(
                "admin_logout",
                [("wallet", session.wallet), ("kind", "trust".to_string())],
            );
        }
        Ok(removed)
    }

    // ========================================================================
    // PIN fallback
    // ========================================================================

    /// Set or replace the PIN for `address`.
    pub async fn pin_setup(&self, address: &str, pin: &str) -> Result<(), AuthError> {
        let address = self.parse_address(address, "pin_setup_failed")?;
        if let Err(e) = validate_pin(pin) {
            self.audit.record(
                "pin_setup_failed",
                [
                    ("step", "validate_pin".to_string()),
                    ("address", address.normalized().to_string()),
                ],
            );
            return Err(e);
        }

        let pin_hash = hash_pin(pin).await?;
        self.stores
            .pins
            .put(&PinCredential {
                address: address.normalized().to_string(),
                pin_hash,
                failed_attempts: 0,
                locked_until: None,
            })
            .await?;

        self.audit
            .record("pin_setup", [("address", address.normalized().to_string())]);
        Ok(())
    }

    /// Check a PIN and, on success, log the wallet in.
    pub async fn pin_verify(&self, address: &str, pin: &str) -> Result<LoginResponse, AuthError> {
        let address = self.parse_address(address, "pin_verify_failed")?;
        let key = address.normalized();

        let fail = |step: &str, err: AuthError| {
            self.audit.record(
                "pin_verify_failed",
                [
                    ("step", step.to_string()),
                    ("address", key.to_string()),
                    ("code", err.code().to_string()),
                ],
            );
            err
        };

        if validate_pin(pin).is_err() {
            return Err(fail("validate_pin", AuthError::InvalidPinFormat));
        }

        // Counted before hashing so concurrent guesses share one budget.
        let now = self.now();
        let credential = match self
            .stores
            .pins
            .begin_attempt(
                key,
                self.settings.pin_max_attempts,
                self.settings.pin_lockout_secs,
                now,
            )
            .await?
        {
            PinAttempt::NotSet => return Err(fail("lookup", AuthError::PinNotSet)),
            PinAttempt::Locked { until } => {
                return Err(fail(
                    "lockout",
                    AuthError::PinLocked {
                        seconds_remaining: until.saturating_sub(now),
                    },
                ))
            }
            PinAttempt::Reserved(credential) => credential,
        };

        if !verify_pin(pin, &credential.pin_hash).await? {
            let err = match credential.locked_until {
                Some(until) => AuthError::PinLocked {
                    seconds_remaining: until.saturating_sub(now),
                },
                None => AuthError::PinInvalid {
                    attempts_remaining: self
                        .settings
                        .pin_max_attempts
                        .saturating_sub(credential.failed_attempts),
                },
            };
            return Err(fail("verify_pin", err));
        }

        self.stores.pins.record_success(key).await?;
        self.complete_login(&address, "pin", None).await
    }

    /// Delete the PIN for `address`. Returns whether one existed.
    pub async fn pin_reset(&self, address: &str) -> Result<bool, AuthError> {
        let address = self.parse_address(address, "pin_reset_failed")?;
        let removed = self.stores.pins.remove(address.normalized()).await?;
        self.audit.record(
            "pin_reset",
            [
                ("address", address.normalized().to_string()),
                ("removed", removed.to_string()),
            ],
        );
        Ok(removed)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Evict expired challenges and sessions from every namespace.
    pub async fn sweep(&self) -> Result<SweepReport, AuthError> {
        let now = self.now();
        let report = SweepReport {
            challenges: self
                .stores
                .challenges
                .sweep(self.settings.challenge_ttl_secs, now)
                .await?,
            admin_challenges: self
                .stores
                .admin_challenges
                .sweep(self.settings.admin_challenge_ttl_secs, now)
                .await?,
            sessions: self.stores.sessions.sweep(now).await?,
            trust_sessions: self.stores.trust_sessions.sweep(now).await?,
        };

        if report.total() > 0 {
            self.audit.record(
                "sweep_completed",
                [
                    ("challenges", report.challenges.to_string()),
                    ("admin_challenges", report.admin_challenges.to_string()),
                    ("sessions", report.sessions.to_string()),
                    ("trust_sessions", report.trust_sessions.to_string()),
                ],
            );
        }
        Ok(report)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn parse_address(&self, input: &str, event: &str) -> Result<Address, AuthError> {
        Address::parse(input).inspect_err(|e| {
            self.audit.record(
                event,
                [
                    ("step", "parse_address".to_string()),
                    ("code", e.code().to_string()),
                ],
            );
        })
    }

    fn require_admin_configured(&self, event: &str) -> Result<&Address, AuthError> {
        self.settings.admin_address.as_ref().ok_or_else(|| {
            self.audit
                .record(event, [("step", "configuration".to_string())]);
            AuthError::NotConfigured
        })
    }

    fn challenge_store(&self, protocol: Protocol) -> &dyn ChallengeStore {
        match protocol {
            Protocol::Login => self.stores.challenges.as_ref(),
            Protocol::Privileged => self.stores.admin_challenges.as_ref(),
        }
    }

    fn challenge_ttl(&self, protocol: Protocol) -> u64 {
        match protocol {
            Protocol::Login => self.settings.challenge_ttl_secs,
            Protocol::Privileged => self.settings.admin_challenge_ttl_secs,
        }
    }

    fn build_message(&self, protocol: Protocol, challenge: &StoredChallenge) -> String {
        let ctx = &self.settings.message;
        match protocol {
            Protocol::Login => {
                ctx.login_message(&challenge.original_address, &challenge.nonce, challenge.issued_at)
            }
            Protocol::Privileged => {
                ctx.admin_message(&challenge.original_address, &challenge.nonce, challenge.issued_at)
            }
        }
    }

    async fn issue(
        &self,
        protocol: Protocol,
        address: &Address,
    ) -> Result<ChallengeResponse, AuthError> {
        let now = self.now();
        let ttl = self.challenge_ttl(protocol);
        let fresh = StoredChallenge {
            nonce: generate_challenge_nonce(),
            issued_at: now,
            original_address: address.original().to_string(),
        };

        let outcome = self
            .challenge_store(protocol)
            .issue_or_reuse(address.normalized(), fresh, ttl, now)
            .await?;

        let event = match &outcome {
            IssueOutcome::Issued(_) => protocol.event("issued"),
            IssueOutcome::Reused(_) => protocol.event("reused"),
        };
        let challenge = outcome.challenge();
        self.audit.record(
            &event,
            [
                ("address", address.normalized().to_string()),
                ("nonce", challenge.nonce.clone()),
            ],
        );

        Ok(ChallengeResponse {
            nonce: challenge.nonce.clone(),
            message: self.build_message(protocol, challenge),
            expires_in: ttl.saturating_sub(now.saturating_sub(challenge.issued_at)),
        })
    }

    async fn consume(
        &self,
        protocol: Protocol,
        address: &Address,
        nonce: &str,
    ) -> Result<StoredChallenge, AuthError> {
        match self.consume_outcome(protocol, address, nonce).await? {
            ConsumeOutcome::Consumed(challenge) => Ok(challenge),
            other => Err(self.consume_rejected(protocol, address, other)),
        }
    }

    /// Consume a challenge. A consumed login nonce is also marked spent so an
    /// unbound sign-in message cannot reuse it.
    async fn consume_outcome(
        &self,
        protocol: Protocol,
        address: &Address,
        nonce: &str,
    ) -> Result<ConsumeOutcome, AuthError> {
        let now = self.now();
        let outcome = self
            .challenge_store(protocol)
            .consume(address.normalized(), nonce, self.challenge_ttl(protocol), now)
            .await?;

        if let ConsumeOutcome::Consumed(challenge) = &outcome {
            if protocol == Protocol::Login && !self.spend_login_nonce(&challenge.nonce, now).await? {
                return Ok(ConsumeOutcome::NoChallenge);
            }
        }
        Ok(outcome)
    }

    /// Spent markers outlive every message that could still pass the
    /// `Issued At` window.
    async fn spend_login_nonce(&self, nonce: &str, now: u64) -> Result<bool, AuthError> {
        let ttl = self
            .settings
            .challenge_ttl_secs
            .saturating_add(MESSAGE_CLOCK_SKEW_SECS);
        Ok(self.stores.challenges.spend_nonce(nonce, ttl, now).await?)
    }

    fn consume_rejected(
        &self,
        protocol: Protocol,
        address: &Address,
        outcome: ConsumeOutcome,
    ) -> AuthError {
        let err = match outcome {
            ConsumeOutcome::NoChallenge | ConsumeOutcome::Consumed(_) => AuthError::NoChallenge,
            ConsumeOutcome::Expired => AuthError::ChallengeExpired,
            ConsumeOutcome::NonceMismatch => AuthError::NonceMismatch,
        };
        self.audit.record(
            protocol.failure_event(),
            [
                ("step", "consume_challenge".to_string()),
                ("address", address.normalized().to_string()),
                ("code", err.code().to_string()),
            ],
        );
        err
    }

    fn signature_rejected(
        &self,
        protocol: Protocol,
        address: &Address,
        result: &VerificationResult,
        flow: &str,
    ) -> AuthError {
        let err = match &result.error {
            Some(VerifyFailure::InvalidFormat(detail)) => {
                AuthError::InvalidSignatureFormat(detail.clone())
            }
            _ => AuthError::SignatureAddressMismatch,
        };
        let reason = result
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();

        self.audit.record(
            protocol.failure_event(),
            [
                ("flow", flow.to_string()),
                ("step", "verify_signature".to_string()),
                ("address", address.normalized().to_string()),
                ("method", result.method.as_str().to_string()),
                ("reason", reason),
            ],
        );
        err
    }

    fn privilege_denied(&self, reason: &str, wallet: Option<&str>) -> PrivilegeCheck {
        let mut data = vec![("step", reason.to_string())];
        if let Some(wallet) = wallet {
            data.push(("wallet", wallet.to_string()));
        }
        self.audit.record("privilege_denied", data);

        PrivilegeCheck {
            is_privileged: false,
            reason: reason.to_string(),
        }
    }

    async fn mint_session(
        &self,
        wallet: &str,
        kind: SessionKind,
    ) -> Result<StoredSession, AuthError> {
        let now = self.now();
        let (store, ttl) = match kind {
            SessionKind::App => (&self.stores.sessions, self.settings.session_ttl_secs),
            SessionKind::Trust => (
                &self.stores.trust_sessions,
                self.settings.trust_session_ttl_secs,
            ),
        };

        let session = StoredSession {
            token: generate_session_token(),
            wallet: wallet.to_string(),
            kind,
            verified_at: now,
            expires_at: now.saturating_add(ttl),
        };
        store.insert(&session, now).await?;
        Ok(session)
    }

    async fn complete_login(
        &self,
        address: &Address,
        flow: &str,
        result: Option<&VerificationResult>,
    ) -> Result<LoginResponse, AuthError> {
        let identity = self
            .stores
            .identities
            .upsert_by_address(address.normalized(), self.now())
            .await?;
        let session = self
            .mint_session(address.normalized(), SessionKind::App)
            .await?;

        let mut data = vec![
            ("flow", flow.to_string()),
            ("address", address.normalized().to_string()),
            ("identity", identity.id.clone()),
        ];
        if let Some(result) = result {
            data.push(("method", result.method.as_str().to_string()));
            data.push(("contract", result.is_contract_account.to_string()));
        }
        self.audit.record("login_success", data);

        Ok(LoginResponse {
            token: session.token,
            identity,
            expires_in: self.settings.session_ttl_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::chain::{ChainError, ChainReader};
    use crate::auth::clock::ManualClock;
    use crate::auth::verify::{
        address_from_private_key, encode_erc6492, parse_signing_key, sign_personal_message,
    };
    use async_trait::async_trait;

    const KEY_A: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const KEY_B: &str = "0x8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f";
    const START: u64 = 1_700_000_000;

    struct Harness {
        auth: Arc<Authenticator>,
        clock: ManualClock,
    }

    fn harness_with(settings: AuthSettings, verifier: SignatureVerifier) -> Harness {
        let clock = ManualClock::new(START);
        let auth = Authenticator::new(settings, Stores::memory(), verifier, Arc::new(clock.clone()));
        Harness {
            auth: Arc::new(auth),
            clock,
        }
    }

    fn harness() -> Harness {
        let admin = address_from_private_key(KEY_A).unwrap();
        harness_with(
            AuthSettings {
                admin_address: Some(admin),
                ..AuthSettings::default()
            },
            SignatureVerifier::default(),
        )
    }

    fn sign(key_hex: &str, message: &str) -> String {
        sign_personal_message(&parse_signing_key(key_hex).unwrap(), message).unwrap()
    }

    /// Checksum-ish mixed case so original-case echo is observable.
    fn mixed_case(address: &Address) -> String {
        address
            .normalized()
            .char_indices()
            .map(|(i, c)| if i > 1 && i % 2 == 0 { c.to_ascii_uppercase() } else { c })
            .collect()
    }

    async fn login(h: &Harness, key: &str) -> LoginResponse {
        let address = address_from_private_key(key).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        h.auth
            .verify_login(
                address.normalized(),
                &challenge.nonce,
                &sign(key, &challenge.message),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_happy_path() {
        let h = harness();
        let response = login(&h, KEY_A).await;

        let session = h.auth.resolve_app_session(&response.token).await.unwrap();
        assert_eq!(session.kind, SessionKind::App);
        assert_eq!(session.wallet, response.identity.address);
        assert_eq!(response.expires_in, 86_400);

        let events: Vec<_> = h.auth.audit().recent(10).into_iter().map(|e| e.event).collect();
        assert_eq!(events, vec!["challenge_issued", "login_success"]);
    }

    #[tokio::test]
    async fn test_challenge_reused_within_ttl() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();

        let first = h.auth.issue_challenge(address.normalized()).await.unwrap();
        h.clock.advance(100);
        let second = h.auth.issue_challenge(address.normalized()).await.unwrap();

        assert_eq!(first.nonce, second.nonce);
        assert_eq!(first.message, second.message);
        assert_eq!(second.expires_in, 200);
        assert_eq!(h.auth.audit().recent(1)[0].event, "challenge_reused");
    }

    #[tokio::test]
    async fn test_message_echoes_original_case() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let mixed = mixed_case(&address);

        let challenge = h.auth.issue_challenge(&mixed).await.unwrap();
        assert!(challenge.message.contains(&format!("\n{}\n", mixed)));

        // Lowercase submission reuses the same challenge and message.
        let again = h.auth.issue_challenge(address.normalized()).await.unwrap();
        assert_eq!(again.message, challenge.message);

        let signature = sign(KEY_A, &challenge.message);
        assert!(h
            .auth
            .verify_login(address.normalized(), &challenge.nonce, &signature)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_nonce_is_single_use() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        let signature = sign(KEY_A, &challenge.message);

        h.auth
            .verify_login(address.normalized(), &challenge.nonce, &signature)
            .await
            .unwrap();
        let replay = h
            .auth
            .verify_login(address.normalized(), &challenge.nonce, &signature)
            .await;
        assert!(matches!(replay, Err(AuthError::NoChallenge)));
    }

    #[tokio::test]
    async fn test_concurrent_verification_succeeds_once() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        let signature = sign(KEY_A, &challenge.message);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let auth = h.auth.clone();
            let address = address.normalized().to_string();
            let nonce = challenge.nonce.clone();
            let signature = signature.clone();
            handles.push(tokio::spawn(async move {
                auth.verify_login(&address, &nonce, &signature).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, AuthError::NoChallenge)),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_expired_challenge_rejected() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        let signature = sign(KEY_A, &challenge.message);

        h.clock.advance(301);
        let result = h
            .auth
            .verify_login(address.normalized(), &challenge.nonce, &signature)
            .await;
        assert!(matches!(result, Err(AuthError::ChallengeExpired)));

        // The expired entry was removed.
        let again = h
            .auth
            .verify_login(address.normalized(), &challenge.nonce, &signature)
            .await;
        assert!(matches!(again, Err(AuthError::NoChallenge)));
    }

    #[tokio::test]
    async fn test_nonce_mismatch_keeps_challenge() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        let signature = sign(KEY_A, &challenge.message);

        let wrong = h
            .auth
            .verify_login(address.normalized(), &"0".repeat(64), &signature)
            .await;
        assert!(matches!(wrong, Err(AuthError::NonceMismatch)));

        assert!(h
            .auth
            .verify_login(address.normalized(), &challenge.nonce, &signature)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_signature_from_other_key_rejected_and_consumed() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();

        let result = h
            .auth
            .verify_login(
                address.normalized(),
                &challenge.nonce,
                &sign(KEY_B, &challenge.message),
            )
            .await;
        assert!(matches!(result, Err(AuthError::SignatureAddressMismatch)));

        let retry = h
            .auth
            .verify_login(
                address.normalized(),
                &challenge.nonce,
                &sign(KEY_A, &challenge.message),
            )
            .await;
        assert!(matches!(retry, Err(AuthError::NoChallenge)));

        let failure = h.auth.audit().recent(2).remove(0);
        assert_eq!(failure.event, "login_failed");
        assert_eq!(failure.data["step"], "verify_signature");
    }

    #[tokio::test]
    async fn test_garbage_signature_format() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();

        let result = h
            .auth
            .verify_login(address.normalized(), &challenge.nonce, "0xzz")
            .await;
        assert!(matches!(result, Err(AuthError::InvalidSignatureFormat(_))));
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let h = harness();
        assert!(matches!(
            h.auth.issue_challenge("0x1234").await,
            Err(AuthError::InvalidAddress(_))
        ));
    }

    /// A sign-in message as a wallet library would format it for this service.
    fn structured(address: &Address, nonce: &str, issued_at: u64) -> String {
        AuthSettings::default()
            .message
            .login_message(address.normalized(), nonce, issued_at)
    }

    #[tokio::test]
    async fn test_structured_message_bound_to_challenge() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        h.clock.advance(20);
        let message = structured(&address, &challenge.nonce, START + 20);

        let response = h
            .auth
            .verify_structured_message(address.normalized(), &message, &sign(KEY_A, &message))
            .await
            .unwrap();
        assert!(h.auth.resolve_app_session(&response.token).await.is_ok());

        // The consumed nonce cannot come back through unbound sign-in.
        let replay = h
            .auth
            .verify_structured_message(address.normalized(), &message, &sign(KEY_A, &message))
            .await;
        assert!(matches!(replay, Err(AuthError::NoChallenge)));
        assert!(!h
            .auth
            .audit()
            .recent(10)
            .iter()
            .any(|e| e.event == "siwe_unbound_verify"));
    }

    #[tokio::test]
    async fn test_structured_message_unbound_is_single_use() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let message = structured(&address, "abcdefgh1234", START);
        let signature = sign(KEY_A, &message);

        h.clock.advance(10);
        let response = h
            .auth
            .verify_structured_message(address.normalized(), &message, &signature)
            .await
            .unwrap();
        assert!(h.auth.resolve_app_session(&response.token).await.is_ok());
        assert_eq!(h.auth.audit().recent(2)[0].event, "siwe_unbound_verify");

        let replay = h
            .auth
            .verify_structured_message(address.normalized(), &message, &signature)
            .await;
        assert!(matches!(replay, Err(AuthError::NoChallenge)));

        // Still refused once the message has aged out.
        h.clock.advance(400);
        let late = h
            .auth
            .verify_structured_message(address.normalized(), &message, &signature)
            .await;
        assert!(matches!(late, Err(AuthError::ChallengeExpired)));
    }

    #[tokio::test]
    async fn test_structured_message_consumed_nonce_blocks_unbound() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        h.auth
            .verify_login(
                address.normalized(),
                &challenge.nonce,
                &sign(KEY_A, &challenge.message),
            )
            .await
            .unwrap();

        let message = structured(&address, &challenge.nonce, START);
        let result = h
            .auth
            .verify_structured_message(address.normalized(), &message, &sign(KEY_A, &message))
            .await;
        assert!(matches!(result, Err(AuthError::NoChallenge)));
    }

    #[tokio::test]
    async fn test_structured_message_unbound_checks() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let nonce = "abcdefgh1234";
        let attempt = |message: String| {
            let auth = h.auth.clone();
            let address = address.normalized().to_string();
            async move {
                let signature = sign(KEY_A, &message);
                auth.verify_structured_message(&address, &message, &signature).await
            }
        };

        let foreign = structured(&address, nonce, START).replacen("localhost", "evil.example", 1);
        assert!(matches!(attempt(foreign).await, Err(AuthError::MalformedMessage)));

        let other_chain =
            structured(&address, nonce, START).replace("Chain ID: 1\n", "Chain ID: 5\n");
        assert!(matches!(attempt(other_chain).await, Err(AuthError::MalformedMessage)));

        let stale = structured(&address, nonce, START - 301);
        assert!(matches!(attempt(stale).await, Err(AuthError::ChallengeExpired)));

        let ahead = structured(&address, nonce, START + MESSAGE_CLOCK_SKEW_SECS + 1);
        assert!(matches!(attempt(ahead).await, Err(AuthError::MalformedMessage)));

        let undated = format!(
            "localhost wants you to sign in with your wallet:\n{}\n\nNonce: {}",
            address.normalized(),
            nonce
        );
        assert!(matches!(attempt(undated).await, Err(AuthError::MalformedMessage)));

        // None of the rejected attempts spent the nonce.
        assert!(attempt(structured(&address, nonce, START)).await.is_ok());
    }

    #[tokio::test]
    async fn test_structured_message_unbound_disabled() {
        let h = harness_with(
            AuthSettings {
                allow_unbound_structured_login: false,
                ..AuthSettings::default()
            },
            SignatureVerifier::default(),
        );
        let address = address_from_private_key(KEY_A).unwrap();
        let message = structured(&address, "abcdefgh1234", START);

        let result = h
            .auth
            .verify_structured_message(address.normalized(), &message, &sign(KEY_A, &message))
            .await;
        assert!(matches!(result, Err(AuthError::NoChallenge)));
    }

    #[tokio::test]
    async fn test_structured_message_rejections() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let other = address_from_private_key(KEY_B).unwrap();

        let no_nonce = "Sign in please";
        assert!(matches!(
            h.auth
                .verify_structured_message(address.normalized(), no_nonce, &sign(KEY_A, no_nonce))
                .await,
            Err(AuthError::MalformedMessage)
        ));

        let foreign = structured(&other, "abcdefgh1234", START);
        assert!(matches!(
            h.auth
                .verify_structured_message(address.normalized(), &foreign, &sign(KEY_A, &foreign))
                .await,
            Err(AuthError::SignatureAddressMismatch)
        ));

        h.auth.issue_challenge(address.normalized()).await.unwrap();
        let stale = structured(&address, "abcdefgh1234", START);
        assert!(matches!(
            h.auth
                .verify_structured_message(address.normalized(), &stale, &sign(KEY_A, &stale))
                .await,
            Err(AuthError::NonceMismatch)
        ));
    }

    #[tokio::test]
    async fn test_privileged_flow_and_check() {
        let h = harness();
        let admin = address_from_private_key(KEY_A).unwrap();

        let challenge = h
            .auth
            .issue_privileged_challenge(admin.normalized())
            .await
            .unwrap();
        assert_eq!(challenge.expires_in, 60);
        assert!(challenge.message.contains("admin verification"));

        let response = h
            .auth
            .verify_privileged(
                admin.normalized(),
                &challenge.nonce,
                &sign(KEY_A, &challenge.message),
            )
            .await
            .unwrap();
        assert_eq!(response.expires_in, 900);

        let check = h
            .auth
            .check_privilege(Some(&response.session_token))
            .await
            .unwrap();
        assert_eq!(
            check,
            PrivilegeCheck {
                is_privileged: true,
                reason: "ok".to_string()
            }
        );

        assert!(h.auth.revoke_privileged(&response.session_token).await.unwrap());
        let check = h
            .auth
            .check_privilege(Some(&response.session_token))
            .await
            .unwrap();
        assert_eq!(check.reason, "session_not_found");
    }

    #[tokio::test]
    async fn test_non_admin_trust_session_not_privileged() {
        let h = harness();
        let other = address_from_private_key(KEY_B).unwrap();

        let challenge = h
            .auth
            .issue_privileged_challenge(other.normalized())
            .await
            .unwrap();
        let response = h
            .auth
            .verify_privileged(
                other.normalized(),
                &challenge.nonce,
                &sign(KEY_B, &challenge.message),
            )
            .await
            .unwrap();

        let check = h
            .auth
            .check_privilege(Some(&response.session_token))
            .await
            .unwrap();
        assert!(!check.is_privileged);
        assert_eq!(check.reason, "not_privileged");
    }

    #[tokio::test]
    async fn test_app_token_never_privileged() {
        let h = harness();
        let response = login(&h, KEY_A).await;

        let check = h.auth.check_privilege(Some(&response.token)).await.unwrap();
        assert!(!check.is_privileged);
        assert_eq!(check.reason, "session_not_found");
    }

    #[tokio::test]
    async fn test_check_privilege_reasons() {
        let h = harness();
        assert_eq!(h.auth.check_privilege(None).await.unwrap().reason, "missing_token");
        assert_eq!(h.auth.check_privilege(Some("")).await.unwrap().reason, "missing_token");
        assert_eq!(
            h.auth.check_privilege(Some("nope")).await.unwrap().reason,
            "session_not_found"
        );

        let unconfigured = harness_with(AuthSettings::default(), SignatureVerifier::default());
        assert_eq!(
            unconfigured.auth.check_privilege(Some("x")).await.unwrap().reason,
            "not_configured"
        );
    }

    #[tokio::test]
    async fn test_trust_session_expires() {
        let h = harness();
        let admin = address_from_private_key(KEY_A).unwrap();
        let challenge = h
            .auth
            .issue_privileged_challenge(admin.normalized())
            .await
            .unwrap();
        let response = h
            .auth
            .verify_privileged(
                admin.normalized(),
                &challenge.nonce,
                &sign(KEY_A, &challenge.message),
            )
            .await
            .unwrap();

        h.clock.advance(901);
        let check = h
            .auth
            .check_privilege(Some(&response.session_token))
            .await
            .unwrap();
        assert_eq!(check.reason, "session_expired");

        let check = h
            .auth
            .check_privilege(Some(&response.session_token))
            .await
            .unwrap();
        assert_eq!(check.reason, "session_not_found");
    }

    #[tokio::test]
    async fn test_privileged_and_login_namespaces_are_separate() {
        let h = harness();
        let admin = address_from_private_key(KEY_A).unwrap();

        let login_challenge = h.auth.issue_challenge(admin.normalized()).await.unwrap();
        let admin_challenge = h
            .auth
            .issue_privileged_challenge(admin.normalized())
            .await
            .unwrap();
        assert_ne!(login_challenge.nonce, admin_challenge.nonce);

        // A login nonce cannot be spent on the privileged protocol.
        let result = h
            .auth
            .verify_privileged(
                admin.normalized(),
                &login_challenge.nonce,
                &sign(KEY_A, &login_challenge.message),
            )
            .await;
        assert!(matches!(result, Err(AuthError::NonceMismatch)));
    }

    #[tokio::test]
    async fn test_privileged_not_configured() {
        let h = harness_with(AuthSettings::default(), SignatureVerifier::default());
        let address = address_from_private_key(KEY_A).unwrap();

        assert!(matches!(
            h.auth.issue_privileged_challenge(address.normalized()).await,
            Err(AuthError::NotConfigured)
        ));
        assert!(matches!(
            h.auth
                .verify_privileged(address.normalized(), "abc", "0x00")
                .await,
            Err(AuthError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_admin_challenge_expires_faster() {
        let h = harness();
        let admin = address_from_private_key(KEY_A).unwrap();
        let challenge = h
            .auth
            .issue_privileged_challenge(admin.normalized())
            .await
            .unwrap();

        h.clock.advance(61);
        let result = h
            .auth
            .verify_privileged(
                admin.normalized(),
                &challenge.nonce,
                &sign(KEY_A, &challenge.message),
            )
            .await;
        assert!(matches!(result, Err(AuthError::ChallengeExpired)));
    }

    #[tokio::test]
    async fn test_pin_lockout_scenario() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let addr = address.normalized();

        h.auth.pin_setup(addr, "4821").await.unwrap();

        for remaining in (1..=4).rev() {
            let result = h.auth.pin_verify(addr, "0000").await;
            match result {
                Err(AuthError::PinInvalid { attempts_remaining }) => {
                    assert_eq!(attempts_remaining, remaining)
                }
                other => panic!("unexpected: {other:?}"),
            }
        }

        let fifth = h.auth.pin_verify(addr, "0000").await;
        assert!(matches!(
            fifth,
            Err(AuthError::PinLocked {
                seconds_remaining: 900
            })
        ));

        // Correct PIN is still refused while locked.
        h.clock.advance(100);
        assert!(matches!(
            h.auth.pin_verify(addr, "4821").await,
            Err(AuthError::PinLocked {
                seconds_remaining: 800
            })
        ));

        h.clock.advance(800);
        let response = h.auth.pin_verify(addr, "4821").await.unwrap();
        assert!(h.auth.resolve_app_session(&response.token).await.is_ok());

        // Counter was reset by the success.
        assert!(matches!(
            h.auth.pin_verify(addr, "0000").await,
            Err(AuthError::PinInvalid {
                attempts_remaining: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_pin_failure_after_lockout_restarts_count() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let addr = address.normalized();
        h.auth.pin_setup(addr, "4821").await.unwrap();

        for _ in 0..5 {
            let _ = h.auth.pin_verify(addr, "0000").await;
        }
        h.clock.advance(900);

        assert!(matches!(
            h.auth.pin_verify(addr, "0000").await,
            Err(AuthError::PinInvalid {
                attempts_remaining: 4
            })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_pin_guesses_share_one_budget() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let addr = address.normalized().to_string();
        h.auth.pin_setup(&addr, "4821").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..40u32 {
            let auth = h.auth.clone();
            let addr = addr.clone();
            handles.push(tokio::spawn(async move {
                let pin = format!("{:04}", 5000 + i);
                auth.pin_verify(&addr, &pin).await
            }));
        }

        let mut locked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Err(AuthError::PinInvalid { .. }) | Err(AuthError::PinLocked { .. }) => {
                    locked += 1
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(locked, 40);

        let hashed = h
            .auth
            .audit()
            .recent(100)
            .into_iter()
            .filter(|e| {
                e.event == "pin_verify_failed"
                    && e.data.get("step").map(String::as_str) == Some("verify_pin")
            })
            .count();
        assert_eq!(hashed, 5);

        // The budget is spent, so the right PIN is refused too.
        assert!(matches!(
            h.auth.pin_verify(&addr, "4821").await,
            Err(AuthError::PinLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_pin_not_counted() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let addr = address.normalized();
        h.auth.pin_setup(addr, "4821").await.unwrap();

        for _ in 0..10 {
            assert!(matches!(
                h.auth.pin_verify(addr, "12ab").await,
                Err(AuthError::InvalidPinFormat)
            ));
        }
        assert!(h.auth.pin_verify(addr, "4821").await.is_ok());
    }

    #[tokio::test]
    async fn test_pin_errors() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let addr = address.normalized();

        assert!(matches!(
            h.auth.pin_verify(addr, "1234").await,
            Err(AuthError::PinNotSet)
        ));
        assert!(matches!(
            h.auth.pin_setup(addr, "12ab").await,
            Err(AuthError::InvalidPinFormat)
        ));

        h.auth.pin_setup(addr, "1234").await.unwrap();
        assert!(h.auth.pin_reset(addr).await.unwrap());
        assert!(matches!(
            h.auth.pin_verify(addr, "1234").await,
            Err(AuthError::PinNotSet)
        ));
        assert!(!h.auth.pin_reset(addr).await.unwrap());
    }

    #[tokio::test]
    async fn test_app_session_expiry_and_revoke() {
        let h = harness();
        let first = login(&h, KEY_A).await;
        let second = login(&h, KEY_A).await;
        assert_eq!(first.identity.id, second.identity.id);

        assert!(h.auth.revoke_app_session(&first.token).await.unwrap());
        assert!(matches!(
            h.auth.resolve_app_session(&first.token).await,
            Err(AuthError::SessionNotFound)
        ));

        h.clock.advance(86_401);
        assert!(matches!(
            h.auth.resolve_app_session(&second.token).await,
            Err(AuthError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_state() {
        let h = harness();
        let admin = address_from_private_key(KEY_A).unwrap();
        let other = address_from_private_key(KEY_B).unwrap();

        login(&h, KEY_A).await;
        h.auth.issue_challenge(other.normalized()).await.unwrap();
        h.auth
            .issue_privileged_challenge(admin.normalized())
            .await
            .unwrap();

        assert_eq!(h.auth.sweep().await.unwrap().total(), 0);

        h.clock.advance(86_401);
        let report = h.auth.sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                challenges: 1,
                admin_challenges: 1,
                sessions: 1,
                trust_sessions: 0,
            }
        );
        assert_eq!(h.auth.audit().recent(1)[0].event, "sweep_completed");
        assert_eq!(h.auth.sweep().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_audit_never_holds_secrets() {
        let h = harness();
        let address = address_from_private_key(KEY_A).unwrap();
        let challenge = h.auth.issue_challenge(address.normalized()).await.unwrap();
        let signature = sign(KEY_B, &challenge.message);
        let _ = h
            .auth
            .verify_login(address.normalized(), &challenge.nonce, &signature)
            .await;
        h.auth.pin_setup(address.normalized(), "987654").await.unwrap();

        let dump = serde_json::to_string(&h.auth.audit().recent(100)).unwrap();
        assert!(!dump.contains(&challenge.nonce));
        assert!(!dump.contains(&signature[2..]));
        assert!(!dump.contains("987654"));
        assert!(!dump.contains(address.normalized()));
    }

    /// Contract wallet double that accepts whatever its owner key signed.
    struct ContractWallet {
        owner_signature: Vec<u8>,
    }

    #[async_trait]
    impl ChainReader for ContractWallet {
        async fn get_code(&self, _address: &Address) -> Result<Vec<u8>, ChainError> {
            Ok(vec![0x60, 0x80])
        }

        async fn call(&self, _to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
            let accepted = data
                .windows(self.owner_signature.len())
                .any(|w| w == self.owner_signature.as_slice());
            let mut out = vec![0u8; 32];
            if accepted {
                out[..4].copy_from_slice(&crate::auth::verify::ERC1271_MAGIC_VALUE);
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_contract_wallet_login_via_erc6492() {
        let contract = Address::parse("0x1111111111111111111111111111111111111111").unwrap();

        // The message depends on the nonce, so sign after issuing.
        let setup = harness();
        let challenge = setup.auth.issue_challenge(contract.normalized()).await.unwrap();
        let inner = hex::decode(&sign(KEY_B, &challenge.message)[2..]).unwrap();

        let chain = Arc::new(ContractWallet {
            owner_signature: inner.clone(),
        });
        let clock = setup.clock.clone();
        let auth = Authenticator::new(
            setup.auth.settings().clone(),
            setup.auth.stores.clone(),
            SignatureVerifier::new(Some(chain)),
            Arc::new(clock),
        );

        let wrapped = encode_erc6492(&[0x22; 20], &[0x01, 0x02], &inner);
        let response = auth
            .verify_login(
                contract.normalized(),
                &challenge.nonce,
                &format!("0x{}", hex::encode(wrapped)),
            )
            .await
            .unwrap();
        assert_eq!(response.identity.address, contract.normalized());

        let success = auth.audit().recent(1).remove(0);
        assert_eq!(success.data["method"], "erc6492");
        assert_eq!(success.data["contract"], "true");
    }
}
