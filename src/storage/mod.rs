//! Storage layer for challenges, sessions, PIN credentials, identities, and
//! rate-limit counters.
//!
//! Every store is a trait so the orchestrator does not care whether state is
//! process-local ([`memory`]) or shared across instances ([`redis`]).
//! Implementations must make each per-key check-and-set atomic.

pub mod memory;
pub mod redis;

use crate::models::{Identity, PinCredential, StoredChallenge, StoredSession};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of [`ChallengeStore::issue_or_reuse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued(StoredChallenge),
    Reused(StoredChallenge),
}

impl IssueOutcome {
    pub fn challenge(&self) -> &StoredChallenge {
        match self {
            IssueOutcome::Issued(c) | IssueOutcome::Reused(c) => c,
        }
    }
}

/// Result of [`ChallengeStore::consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Nonce matched; the entry has been deleted.
    Consumed(StoredChallenge),
    NoChallenge,
    /// Entry was older than the TTL and has been deleted.
    Expired,
    /// Entry is kept so the client may retry within its TTL.
    NonceMismatch,
}

/// Outcome of [`PinStore::begin_attempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinAttempt {
    NotSet,
    /// Nothing was counted.
    Locked { until: u64 },
    /// The attempt is counted; the credential carries the new counter and
    /// any lockout this attempt triggered.
    Reserved(PinCredential),
}

/// Single-use challenge nonces keyed by normalized address.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Return the live challenge for `address` if its age is below `ttl_secs`,
    /// otherwise store `fresh` in its place.
    async fn issue_or_reuse(
        &self,
        address: &str,
        fresh: StoredChallenge,
        ttl_secs: u64,
        now: u64,
    ) -> Result<IssueOutcome, StoreError>;

    async fn consume(
        &self,
        address: &str,
        nonce: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Mark `nonce` as spent for `ttl_secs`. Returns false if it already was.
    async fn spend_nonce(
        &self,
        nonce: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<bool, StoreError>;

    /// Delete challenges older than `ttl_secs`. Returns how many were removed.
    async fn sweep(&self, ttl_secs: u64, now: u64) -> Result<usize, StoreError>;
}

/// Bearer sessions keyed by token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &StoredSession, now: u64) -> Result<(), StoreError>;

    async fn get(&self, token: &str) -> Result<Option<StoredSession>, StoreError>;

    /// Returns true if the session existed.
    async fn remove(&self, token: &str) -> Result<bool, StoreError>;

    /// Delete sessions whose `expires_at` has passed.
    async fn sweep(&self, now: u64) -> Result<usize, StoreError>;
}

/// Persistent PIN credentials keyed by normalized address.
#[async_trait]
pub trait PinStore: Send + Sync {
    async fn get(&self, address: &str) -> Result<Option<PinCredential>, StoreError>;

    /// Insert or replace a credential.
    async fn put(&self, credential: &PinCredential) -> Result<(), StoreError>;

    /// Atomically reserve one verification attempt.
    ///
    /// Refuses while a lockout is active. Otherwise an elapsed lockout is
    /// cleared (counting restarts at zero), the attempt is counted, and
    /// reaching `max_attempts` sets `locked_until = now + lockout_secs`. The
    /// hash is checked only after the attempt is counted, so concurrent
    /// guesses can never exceed `max_attempts` per lockout window.
    async fn begin_attempt(
        &self,
        address: &str,
        max_attempts: u32,
        lockout_secs: u64,
        now: u64,
    ) -> Result<PinAttempt, StoreError>;

    /// Reset the failure counter and clear any lockout.
    async fn record_success(&self, address: &str) -> Result<(), StoreError>;

    async fn remove(&self, address: &str) -> Result<bool, StoreError>;
}

/// User-identity collaborator.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up the identity for `address`, creating it on first login.
    async fn upsert_by_address(&self, address: &str, now: u64) -> Result<Identity, StoreError>;
}

/// Fixed-window request counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count a request against `key` and return the count in the current window.
    async fn hit(&self, key: &str, window_secs: u64, now: u64) -> Result<u32, StoreError>;

    /// Drop counters whose window has closed.
    async fn sweep(&self, window_secs: u64, now: u64) -> Result<usize, StoreError>;
}

/// Every store the authenticator and HTTP layer need.
///
/// Login and privileged challenges live in separate stores, as do app
/// sessions and trust sessions, so the namespaces can never collide.
#[derive(Clone)]
pub struct Stores {
    pub challenges: Arc<dyn ChallengeStore>,
    pub admin_challenges: Arc<dyn ChallengeStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub trust_sessions: Arc<dyn SessionStore>,
    pub pins: Arc<dyn PinStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
}

impl Stores {
    /// Process-local stores.
    pub fn memory() -> Self {
        Self {
            challenges: Arc::new(memory::MemoryChallengeStore::default()),
            admin_challenges: Arc::new(memory::MemoryChallengeStore::default()),
            sessions: Arc::new(memory::MemorySessionStore::default()),
            trust_sessions: Arc::new(memory::MemorySessionStore::default()),
            pins: Arc::new(memory::MemoryPinStore::default()),
            identities: Arc::new(memory::MemoryIdentityStore::default()),
            rate_limits: Arc::new(memory::MemoryRateLimitStore::default()),
        }
    }

    /// Redis-backed stores, shareable between instances.
    pub fn redis(client: ::redis::Client) -> Self {
        Self {
            challenges: Arc::new(redis::RedisChallengeStore::new(client.clone(), "challenge")),
            admin_challenges: Arc::new(redis::RedisChallengeStore::new(
                client.clone(),
                "admin_challenge",
            )),
            sessions: Arc::new(redis::RedisSessionStore::new(client.clone(), "session")),
            trust_sessions: Arc::new(redis::RedisSessionStore::new(
                client.clone(),
                "trust_session",
            )),
            pins: Arc::new(redis::RedisPinStore::new(client.clone())),
            identities: Arc::new(redis::RedisIdentityStore::new(client.clone())),
            rate_limits: Arc::new(redis::RedisRateLimitStore::new(client)),
        }
    }
}
