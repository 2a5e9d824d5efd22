//! Process-local stores on sharded concurrent maps.
//!
//! `DashMap`'s entry API locks a single shard for the duration of a
//! check-and-set, so operations on one address never block unrelated ones.
//! No entry guard is held across an `.await`.

use super::{
    ChallengeStore, ConsumeOutcome, IdentityStore, IssueOutcome, PinAttempt, PinStore,
    RateLimitStore, SessionStore, StoreError,
};
use crate::models::{Identity, PinCredential, StoredChallenge, StoredSession};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use subtle::ConstantTimeEq;

/// Constant-time nonce comparison.
pub(crate) fn nonce_matches(stored: &str, supplied: &str) -> bool {
    stored.as_bytes().ct_eq(supplied.as_bytes()).into()
}

#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    entries: DashMap<String, StoredChallenge>,
    /// nonce -> marker expiry
    spent: DashMap<String, u64>,
}

impl MemoryChallengeStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn issue_or_reuse(
        &self,
        address: &str,
        fresh: StoredChallenge,
        ttl_secs: u64,
        now: u64,
    ) -> Result<IssueOutcome, StoreError> {
        let outcome = match self.entries.entry(address.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.saturating_sub(entry.get().issued_at) < ttl_secs {
                    IssueOutcome::Reused(entry.get().clone())
                } else {
                    entry.insert(fresh.clone());
                    IssueOutcome::Issued(fresh)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh.clone());
                IssueOutcome::Issued(fresh)
            }
        };
        Ok(outcome)
    }

    async fn consume(
        &self,
        address: &str,
        nonce: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let outcome = match self.entries.entry(address.to_string()) {
            Entry::Vacant(_) => ConsumeOutcome::NoChallenge,
            Entry::Occupied(entry) => {
                if now.saturating_sub(entry.get().issued_at) > ttl_secs {
                    entry.remove();
                    ConsumeOutcome::Expired
                } else if !nonce_matches(&entry.get().nonce, nonce) {
                    ConsumeOutcome::NonceMismatch
                } else {
                    ConsumeOutcome::Consumed(entry.remove())
                }
            }
        };
        Ok(outcome)
    }

    async fn spend_nonce(
        &self,
        nonce: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<bool, StoreError> {
        let expires_at = now.saturating_add(ttl_secs);
        let fresh = match self.spent.entry(nonce.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(expires_at);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        };
        Ok(fresh)
    }

    async fn sweep(&self, ttl_secs: u64, now: u64) -> Result<usize, StoreError> {
        self.spent.retain(|_, expires_at| *expires_at > now);

        let before = self.entries.len();
        self.entries
            .retain(|_, c| now.saturating_sub(c.issued_at) <= ttl_secs);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: DashMap<String, StoredSession>,
}

impl MemorySessionStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &StoredSession, _now: u64) -> Result<(), StoreError> {
        self.entries.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<StoredSession>, StoreError> {
        Ok(self.entries.get(token).map(|s| s.value().clone()))
    }

    async fn remove(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(token).is_some())
    }

    async fn sweep(&self, now: u64) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, s| now <= s.expires_at);
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryPinStore {
    entries: DashMap<String, PinCredential>,
}

#[async_trait]
impl PinStore for MemoryPinStore {
    async fn get(&self, address: &str) -> Result<Option<PinCredential>, StoreError> {
        Ok(self.entries.get(address).map(|c| c.value().clone()))
    }

    async fn put(&self, credential: &PinCredential) -> Result<(), StoreError> {
        self.entries
            .insert(credential.address.clone(), credential.clone());
        Ok(())
    }

    async fn begin_attempt(
        &self,
        address: &str,
        max_attempts: u32,
        lockout_secs: u64,
        now: u64,
    ) -> Result<PinAttempt, StoreError> {
        let Some(mut entry) = self.entries.get_mut(address) else {
            return Ok(PinAttempt::NotSet);
        };
        let credential = entry.value_mut();

        match credential.locked_until {
            Some(until) if until > now => return Ok(PinAttempt::Locked { until }),
            Some(_) => {
                credential.locked_until = None;
                credential.failed_attempts = 0;
            }
            None => {}
        }

        credential.failed_attempts = credential.failed_attempts.saturating_add(1);
        if credential.failed_attempts >= max_attempts {
            credential.locked_until = Some(now.saturating_add(lockout_secs));
        }

        Ok(PinAttempt::Reserved(credential.clone()))
    }

    async fn record_success(&self, address: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(address) {
            entry.failed_attempts = 0;
            entry.locked_until = None;
        }
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self.entries.remove(address).is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    entries: DashMap<String, Identity>,
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn upsert_by_address(&self, address: &str, now: u64) -> Result<Identity, StoreError> {
        let identity = match self.entries.entry(address.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().last_login_at = now;
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let identity = Identity {
                    id: nanoid::nanoid!(12),
                    address: address.to_string(),
                    created_at: now,
                    last_login_at: now,
                };
                entry.insert(identity.clone());
                identity
            }
        };
        Ok(identity)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    /// key -> (window start, count)
    windows: DashMap<String, (u64, u32)>,
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, window_secs: u64, now: u64) -> Result<u32, StoreError> {
        let mut window = self.windows.entry(key.to_string()).or_insert((now, 0));
        if now.saturating_sub(window.0) >= window_secs {
            *window = (now, 0);
        }
        window.1 = window.1.saturating_add(1);
        Ok(window.1)
    }

    async fn sweep(&self, window_secs: u64, now: u64) -> Result<usize, StoreError> {
        let before = self.windows.len();
        self.windows
            .retain(|_, (start, _)| now.saturating_sub(*start) < window_secs);
        Ok(before.saturating_sub(self.windows.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ADDR: &str = "0xabcdef0123456789abcdef0123456789abcdef01";

    fn challenge(nonce: &str, issued_at: u64) -> StoredChallenge {
        StoredChallenge {
            nonce: nonce.to_string(),
            issued_at,
            original_address: ADDR.to_uppercase().replacen("0X", "0x", 1),
        }
    }

    #[tokio::test]
    async fn test_issue_then_reuse_within_ttl() {
        let store = MemoryChallengeStore::default();

        let first = store
            .issue_or_reuse(ADDR, challenge("nonce-one", 100), 60, 100)
            .await
            .unwrap();
        assert!(matches!(first, IssueOutcome::Issued(_)));

        let second = store
            .issue_or_reuse(ADDR, challenge("nonce-two", 159), 60, 159)
            .await
            .unwrap();
        assert!(matches!(second, IssueOutcome::Reused(_)));
        assert_eq!(second.challenge().nonce, "nonce-one");
        assert_eq!(second.challenge().issued_at, 100);
    }

    #[tokio::test]
    async fn test_issue_replaces_stale_challenge() {
        let store = MemoryChallengeStore::default();
        store
            .issue_or_reuse(ADDR, challenge("old", 100), 60, 100)
            .await
            .unwrap();

        let outcome = store
            .issue_or_reuse(ADDR, challenge("new", 160), 60, 160)
            .await
            .unwrap();
        assert_eq!(outcome, IssueOutcome::Issued(challenge("new", 160)));
    }

    #[tokio::test]
    async fn test_concurrent_issue_returns_one_nonce() {
        let store = Arc::new(MemoryChallengeStore::default());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .issue_or_reuse(ADDR, challenge(&format!("nonce-{i}"), 100), 60, 100)
                    .await
                    .unwrap()
                    .challenge()
                    .nonce
                    .clone()
            }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.dedup();
        assert_eq!(nonces.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_consume_outcomes() {
        let store = MemoryChallengeStore::default();
        assert_eq!(
            store.consume(ADDR, "x", 60, 100).await.unwrap(),
            ConsumeOutcome::NoChallenge
        );

        store
            .issue_or_reuse(ADDR, challenge("right", 100), 60, 100)
            .await
            .unwrap();

        assert_eq!(
            store.consume(ADDR, "wrong", 60, 110).await.unwrap(),
            ConsumeOutcome::NonceMismatch
        );
        // Mismatch keeps the entry.
        assert_eq!(store.len(), 1);

        assert_eq!(
            store.consume(ADDR, "right", 60, 120).await.unwrap(),
            ConsumeOutcome::Consumed(challenge("right", 100))
        );
        assert_eq!(
            store.consume(ADDR, "right", 60, 121).await.unwrap(),
            ConsumeOutcome::NoChallenge
        );
    }

    #[tokio::test]
    async fn test_consume_expired_deletes_entry() {
        let store = MemoryChallengeStore::default();
        store
            .issue_or_reuse(ADDR, challenge("n", 100), 60, 100)
            .await
            .unwrap();

        assert_eq!(
            store.consume(ADDR, "n", 60, 161).await.unwrap(),
            ConsumeOutcome::Expired
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_challenge_sweep() {
        let store = MemoryChallengeStore::default();
        store
            .issue_or_reuse("a", challenge("n1", 100), 60, 100)
            .await
            .unwrap();
        store
            .issue_or_reuse("b", challenge("n2", 150), 60, 150)
            .await
            .unwrap();

        assert_eq!(store.sweep(60, 170).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        // Idempotent.
        assert_eq!(store.sweep(60, 170).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_session_store_roundtrip_and_sweep() {
        let store = MemorySessionStore::default();
        let session = StoredSession {
            token: "tok".to_string(),
            wallet: ADDR.to_string(),
            kind: crate::models::SessionKind::Trust,
            verified_at: 100,
            expires_at: 200,
        };
        store.insert(&session, 100).await.unwrap();
        assert_eq!(store.get("tok").await.unwrap(), Some(session));

        assert_eq!(store.sweep(200).await.unwrap(), 0);
        assert_eq!(store.sweep(201).await.unwrap(), 1);
        assert!(store.get("tok").await.unwrap().is_none());
        assert!(!store.remove("tok").await.unwrap());
    }

    fn credential() -> PinCredential {
        PinCredential {
            address: ADDR.to_string(),
            pin_hash: "hash".to_string(),
            failed_attempts: 0,
            locked_until: None,
        }
    }

    #[tokio::test]
    async fn test_pin_attempts_and_lockout() {
        let store = MemoryPinStore::default();
        assert_eq!(
            store.begin_attempt(ADDR, 3, 60, 0).await.unwrap(),
            PinAttempt::NotSet
        );

        store.put(&credential()).await.unwrap();

        let PinAttempt::Reserved(c) = store.begin_attempt(ADDR, 3, 60, 10).await.unwrap() else {
            panic!("expected reservation");
        };
        assert_eq!((c.failed_attempts, c.locked_until), (1, None));
        store.begin_attempt(ADDR, 3, 60, 11).await.unwrap();
        let PinAttempt::Reserved(c) = store.begin_attempt(ADDR, 3, 60, 12).await.unwrap() else {
            panic!("expected reservation");
        };
        assert_eq!((c.failed_attempts, c.locked_until), (3, Some(72)));

        // Locked: refused and not counted.
        assert_eq!(
            store.begin_attempt(ADDR, 3, 60, 50).await.unwrap(),
            PinAttempt::Locked { until: 72 }
        );
        assert_eq!(store.get(ADDR).await.unwrap().unwrap().failed_attempts, 3);

        // Lockout elapsed: counting restarts.
        let PinAttempt::Reserved(c) = store.begin_attempt(ADDR, 3, 60, 72).await.unwrap() else {
            panic!("expected reservation");
        };
        assert_eq!((c.failed_attempts, c.locked_until), (1, None));

        store.record_success(ADDR).await.unwrap();
        let c = store.get(ADDR).await.unwrap().unwrap();
        assert_eq!((c.failed_attempts, c.locked_until), (0, None));

        assert!(store.remove(ADDR).await.unwrap());
        assert!(store.get(ADDR).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_pin_attempts_never_exceed_threshold() {
        let store = Arc::new(MemoryPinStore::default());
        store.put(&credential()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.begin_attempt(ADDR, 5, 900, 100).await.unwrap()
            }));
        }

        let mut reserved = 0;
        let mut locked = 0;
        for handle in handles {
            match handle.await.unwrap() {
                PinAttempt::Reserved(_) => reserved += 1,
                PinAttempt::Locked { until } => {
                    assert_eq!(until, 1_000);
                    locked += 1;
                }
                PinAttempt::NotSet => panic!("credential vanished"),
            }
        }
        assert_eq!((reserved, locked), (5, 59));
    }

    #[tokio::test]
    async fn test_lockout_saturates() {
        let store = MemoryPinStore::default();
        store.put(&credential()).await.unwrap();

        let PinAttempt::Reserved(c) = store
            .begin_attempt(ADDR, 1, u64::MAX, 10)
            .await
            .unwrap()
        else {
            panic!("expected reservation");
        };
        assert_eq!(c.locked_until, Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_spent_nonce_marker() {
        let store = MemoryChallengeStore::default();
        assert!(store.spend_nonce("abcdefgh", 60, 100).await.unwrap());
        assert!(!store.spend_nonce("abcdefgh", 60, 159).await.unwrap());
        assert!(store.spend_nonce("other123", 60, 159).await.unwrap());

        // Marker lapses with its TTL and is swept.
        store.sweep(60, 160).await.unwrap();
        assert!(store.spend_nonce("abcdefgh", 60, 160).await.unwrap());
    }

    #[tokio::test]
    async fn test_identity_upsert_is_stable() {
        let store = MemoryIdentityStore::default();
        let first = store.upsert_by_address(ADDR, 100).await.unwrap();
        let second = store.upsert_by_address(ADDR, 200).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.created_at, 100);
        assert_eq!(second.last_login_at, 200);
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let store = MemoryRateLimitStore::default();
        assert_eq!(store.hit("ip", 60, 0).await.unwrap(), 1);
        assert_eq!(store.hit("ip", 60, 30).await.unwrap(), 2);
        assert_eq!(store.hit("ip", 60, 60).await.unwrap(), 1);

        assert_eq!(store.sweep(60, 100).await.unwrap(), 0);
        assert_eq!(store.sweep(60, 120).await.unwrap(), 1);
    }

    #[test]
    fn test_nonce_matches() {
        assert!(nonce_matches("abc", "abc"));
        assert!(!nonce_matches("abc", "abd"));
        assert!(!nonce_matches("abc", "abcd"));
    }
}
