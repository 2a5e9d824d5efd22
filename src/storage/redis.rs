//! Redis-backed stores for multi-instance deployments.
//!
//! Redis key patterns:
//! - `{namespace}:{address}` — challenge (JSON), namespace `challenge` or `admin_challenge`
//! - `{namespace}:spent:{nonce}` — spent-nonce marker
//! - `{namespace}:{token}` — session (JSON), namespace `session` or `trust_session`
//! - `pin:{address}` — PIN credential (JSON)
//! - `identity:{address}` — identity (JSON)
//! - `ratelimit:{key}` — request counter
//!
//! Multi-step check-and-set runs inside Lua scripts so it is atomic across
//! instances. Keys carry native expiry, so `sweep` is a no-op here.
//!
//! JSON read back from Redis is wrapped in `Zeroizing` so nonces and PIN
//! hashes are cleared from application memory once deserialized.

use super::memory::nonce_matches;
use super::{
    ChallengeStore, ConsumeOutcome, IdentityStore, IssueOutcome, PinAttempt, PinStore,
    RateLimitStore, SessionStore, StoreError,
};
use crate::models::{Identity, PinCredential, StoredChallenge, StoredSession};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use zeroize::Zeroizing;

/// Extra lifetime past the logical TTL so a late consume still reports
/// `Expired` instead of `NoChallenge`.
const CHALLENGE_EXPIRY_GRACE_SECS: u64 = 60;

const ISSUE_OR_REUSE_SCRIPT: &str = r"
    local val = redis.call('GET', KEYS[1])
    if val then
        local c = cjson.decode(val)
        local age = math.max(0, tonumber(ARGV[3]) - c.issued_at)
        if age < tonumber(ARGV[2]) then
            return {0, val}
        end
    end
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[4])
    return {1, ARGV[1]}
";

const DELETE_IF_EQUAL_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// Returns `{0, ''}` when unset, `{1, json}` when locked (nothing counted),
/// `{2, json}` once the attempt is counted.
const PIN_ATTEMPT_SCRIPT: &str = r"
    local val = redis.call('GET', KEYS[1])
    if not val then
        return {0, ''}
    end
    local c = cjson.decode(val)
    local now = tonumber(ARGV[3])
    local locked = c.locked_until ~= nil and c.locked_until ~= cjson.null
    if locked and c.locked_until > now then
        return {1, val}
    end
    if locked then
        c.locked_until = cjson.null
        c.failed_attempts = 0
    end
    c.failed_attempts = c.failed_attempts + 1
    if c.failed_attempts >= tonumber(ARGV[1]) then
        c.locked_until = tonumber(ARGV[4])
    end
    local out = cjson.encode(c)
    redis.call('SET', KEYS[1], out)
    return {2, out}
";

const PIN_SUCCESS_SCRIPT: &str = r"
    local val = redis.call('GET', KEYS[1])
    if not val then
        return 0
    end
    local c = cjson.decode(val)
    c.failed_attempts = 0
    c.locked_until = cjson.null
    redis.call('SET', KEYS[1], cjson.encode(c))
    return 1
";

const IDENTITY_UPSERT_SCRIPT: &str = r"
    local val = redis.call('GET', KEYS[1])
    if val then
        local c = cjson.decode(val)
        c.last_login_at = tonumber(ARGV[2])
        val = cjson.encode(c)
    else
        val = ARGV[1]
    end
    redis.call('SET', KEYS[1], val)
    return val
";

async fn connect(client: &redis::Client) -> Result<MultiplexedConnection, StoreError> {
    Ok(client.get_multiplexed_async_connection().await?)
}

fn decode<T: DeserializeOwned>(json: String) -> Result<T, StoreError> {
    let data = Zeroizing::new(json);
    Ok(serde_json::from_str(&data)?)
}

pub struct RedisChallengeStore {
    client: redis::Client,
    namespace: &'static str,
}

impl RedisChallengeStore {
    pub fn new(client: redis::Client, namespace: &'static str) -> Self {
        Self { client, namespace }
    }

    fn key(&self, address: &str) -> String {
        format!("{}:{}", self.namespace, address)
    }
}

#[async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn issue_or_reuse(
        &self,
        address: &str,
        fresh: StoredChallenge,
        ttl_secs: u64,
        now: u64,
    ) -> Result<IssueOutcome, StoreError> {
        let mut con = connect(&self.client).await?;
        let json = serde_json::to_string(&fresh)?;

        let (issued, stored): (i64, String) = redis::Script::new(ISSUE_OR_REUSE_SCRIPT)
            .key(self.key(address))
            .arg(json)
            .arg(ttl_secs)
            .arg(now)
            .arg(ttl_secs.max(1) + CHALLENGE_EXPIRY_GRACE_SECS)
            .invoke_async(&mut con)
            .await?;

        if issued == 1 {
            Ok(IssueOutcome::Issued(fresh))
        } else {
            Ok(IssueOutcome::Reused(decode(stored)?))
        }
    }

    async fn consume(
        &self,
        address: &str,
        nonce: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut con = connect(&self.client).await?;
        let key = self.key(address);

        let raw: Option<String> = con.get(&key).await?;
        let Some(raw) = raw else {
            return Ok(ConsumeOutcome::NoChallenge);
        };
        let raw = Zeroizing::new(raw);
        let challenge: StoredChallenge = serde_json::from_str(&raw)?;

        let delete = redis::Script::new(DELETE_IF_EQUAL_SCRIPT);

        if now.saturating_sub(challenge.issued_at) > ttl_secs {
            let _: i64 = delete
                .key(&key)
                .arg(raw.as_str())
                .invoke_async(&mut con)
                .await?;
            return Ok(ConsumeOutcome::Expired);
        }

        if !nonce_matches(&challenge.nonce, nonce) {
            return Ok(ConsumeOutcome::NonceMismatch);
        }

        // Only the caller whose delete lands owns the nonce.
        let deleted: i64 = delete
            .key(&key)
            .arg(raw.as_str())
            .invoke_async(&mut con)
            .await?;
        if deleted == 0 {
            return Ok(ConsumeOutcome::NoChallenge);
        }

        Ok(ConsumeOutcome::Consumed(challenge))
    }

    async fn spend_nonce(
        &self,
        nonce: &str,
        ttl_secs: u64,
        _now: u64,
    ) -> Result<bool, StoreError> {
        let mut con = connect(&self.client).await?;
        let set: Option<String> = redis::cmd("SET")
            .arg(format!("{}:spent:{}", self.namespace, nonce))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut con)
            .await?;
        Ok(set.is_some())
    }

    async fn sweep(&self, _ttl_secs: u64, _now: u64) -> Result<usize, StoreError> {
        Ok(0)
    }
}

pub struct RedisSessionStore {
    client: redis::Client,
    namespace: &'static str,
}

impl RedisSessionStore {
    pub fn new(client: redis::Client, namespace: &'static str) -> Self {
        Self { client, namespace }
    }

    fn key(&self, token: &str) -> String {
        format!("{}:{}", self.namespace, token)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert(&self, session: &StoredSession, now: u64) -> Result<(), StoreError> {
        let mut con = connect(&self.client).await?;
        let json = serde_json::to_string(session)?;
        let ttl = session.expires_at.saturating_sub(now).max(1);

        con.set_ex::<_, _, ()>(self.key(&session.token), json, ttl)
            .await?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<StoredSession>, StoreError> {
        let mut con = connect(&self.client).await?;
        let json: Option<String> = con.get(self.key(token)).await?;
        json.map(decode).transpose()
    }

    async fn remove(&self, token: &str) -> Result<bool, StoreError> {
        let mut con = connect(&self.client).await?;
        let deleted: i32 = con.del(self.key(token)).await?;
        Ok(deleted > 0)
    }

    async fn sweep(&self, _now: u64) -> Result<usize, StoreError> {
        Ok(0)
    }
}

pub struct RedisPinStore {
    client: redis::Client,
}

impl RedisPinStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn key(address: &str) -> String {
        format!("pin:{}", address)
    }
}

#[async_trait]
impl PinStore for RedisPinStore {
    async fn get(&self, address: &str) -> Result<Option<PinCredential>, StoreError> {
        let mut con = connect(&self.client).await?;
        let json: Option<String> = con.get(Self::key(address)).await?;
        json.map(decode).transpose()
    }

    async fn put(&self, credential: &PinCredential) -> Result<(), StoreError> {
        let mut con = connect(&self.client).await?;
        let json = Zeroizing::new(serde_json::to_string(credential)?);
        con.set::<_, _, ()>(Self::key(&credential.address), json.as_str())
            .await?;
        Ok(())
    }

    async fn begin_attempt(
        &self,
        address: &str,
        max_attempts: u32,
        lockout_secs: u64,
        now: u64,
    ) -> Result<PinAttempt, StoreError> {
        let mut con = connect(&self.client).await?;
        let (state, json): (i64, String) = redis::Script::new(PIN_ATTEMPT_SCRIPT)
            .key(Self::key(address))
            .arg(max_attempts)
            .arg(lockout_secs)
            .arg(now)
            .arg(now.saturating_add(lockout_secs))
            .invoke_async(&mut con)
            .await?;

        match state {
            0 => Ok(PinAttempt::NotSet),
            1 => {
                let credential: PinCredential = decode(json)?;
                Ok(PinAttempt::Locked {
                    until: credential.locked_until.unwrap_or(now),
                })
            }
            _ => Ok(PinAttempt::Reserved(decode(json)?)),
        }
    }

    async fn record_success(&self, address: &str) -> Result<(), StoreError> {
        let mut con = connect(&self.client).await?;
        let _: i64 = redis::Script::new(PIN_SUCCESS_SCRIPT)
            .key(Self::key(address))
            .invoke_async(&mut con)
            .await?;
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<bool, StoreError> {
        let mut con = connect(&self.client).await?;
        let deleted: i32 = con.del(Self::key(address)).await?;
        Ok(deleted > 0)
    }
}

pub struct RedisIdentityStore {
    client: redis::Client,
}

impl RedisIdentityStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityStore for RedisIdentityStore {
    async fn upsert_by_address(&self, address: &str, now: u64) -> Result<Identity, StoreError> {
        let mut con = connect(&self.client).await?;
        let fresh = Identity {
            id: nanoid::nanoid!(12),
            address: address.to_string(),
            created_at: now,
            last_login_at: now,
        };

        let json: String = redis::Script::new(IDENTITY_UPSERT_SCRIPT)
            .key(format!("identity:{}", address))
            .arg(serde_json::to_string(&fresh)?)
            .arg(now)
            .invoke_async(&mut con)
            .await?;
        Ok(serde_json::from_str(&json)?)
    }
}

pub struct RedisRateLimitStore {
    client: redis::Client,
}

impl RedisRateLimitStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(&self, key: &str, window_secs: u64, _now: u64) -> Result<u32, StoreError> {
        let mut con = connect(&self.client).await?;
        let key = format!("ratelimit:{}", key);

        let count: u32 = con.incr(&key, 1).await?;

        // Set TTL on first request
        if count == 1 {
            con.expire::<_, ()>(&key, window_secs as i64).await?;
        }

        Ok(count)
    }

    async fn sweep(&self, _window_secs: u64, _now: u64) -> Result<usize, StoreError> {
        Ok(0)
    }
}
