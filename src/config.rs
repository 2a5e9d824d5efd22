use crate::auth::address::Address;
use crate::auth::message::MessageContext;
use crate::auth::orchestrator::AuthSettings;
use std::env;
use std::net::SocketAddr;

/// Upper bound for any configured duration (ten years).
pub const MAX_DURATION_SECS: u64 = 315_360_000;

#[derive(Clone)]
pub struct Config {
    // Privileged identity
    pub admin_address: Option<Address>,

    // Backends
    pub redis_url: Option<String>,
    pub chain_rpc_url: Option<String>,

    // Server
    pub bind_addr: SocketAddr,

    // Sign-in message context
    pub chain_id: u64,
    pub auth_domain: String,
    pub auth_uri: String,

    // TTLs (in seconds)
    pub challenge_ttl_secs: u64,
    pub admin_challenge_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub trust_session_ttl_secs: u64,
    pub sweep_interval_secs: u64,

    // PIN fallback
    pub pin_max_attempts: u32,
    pub pin_lockout_secs: u64,

    // Audit
    pub audit_capacity: usize,

    // Structured sign-in
    pub allow_unbound_siwe: bool,

    // Rate limiting
    pub rate_limit_auth_per_min: u32,
    pub rate_limit_admin_per_min: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "admin_address",
                &self.admin_address.as_ref().map(|a| a.normalized().to_string()),
            )
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("chain_rpc_url", &self.chain_rpc_url.as_ref().map(|_| "[REDACTED]"))
            .field("bind_addr", &self.bind_addr)
            .field("chain_id", &self.chain_id)
            .field("auth_domain", &self.auth_domain)
            .field("auth_uri", &self.auth_uri)
            .field("challenge_ttl_secs", &self.challenge_ttl_secs)
            .field("admin_challenge_ttl_secs", &self.admin_challenge_ttl_secs)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("trust_session_ttl_secs", &self.trust_session_ttl_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("pin_max_attempts", &self.pin_max_attempts)
            .field("pin_lockout_secs", &self.pin_lockout_secs)
            .field("audit_capacity", &self.audit_capacity)
            .field("allow_unbound_siwe", &self.allow_unbound_siwe)
            .field("rate_limit_auth_per_min", &self.rate_limit_auth_per_min)
            .field("rate_limit_admin_per_min", &self.rate_limit_admin_per_min)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Attempt to load .env file, but don't fail if it doesn't exist
        // (env vars may be set directly in production)
        let _ = dotenvy::dotenv();

        // Privileged identity. Unset or empty disables the privileged protocol.
        let admin_address = match optional_env("ADMIN_ADDRESS") {
            Some(raw) => Some(Address::parse(&raw).map_err(|e| {
                ConfigError::InvalidValue("ADMIN_ADDRESS".to_string(), e.to_string())
            })?),
            None => None,
        };

        // Backends
        let redis_url = optional_env("REDIS_URL");
        let chain_rpc_url = optional_env("CHAIN_RPC_URL");

        // Server
        let bind_addr_str = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;

        // Sign-in message context
        let chain_id = parse_env_or_default("CHAIN_ID", 1)?;
        let auth_domain = env::var("AUTH_DOMAIN").unwrap_or_else(|_| "localhost".to_string());
        if auth_domain.is_empty() || auth_domain.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue(
                "AUTH_DOMAIN".to_string(),
                "must be a non-empty host without whitespace".to_string(),
            ));
        }
        let auth_uri =
            env::var("AUTH_URI").unwrap_or_else(|_| "http://localhost:3000".to_string());

        // TTLs
        let challenge_ttl_secs = parse_env_or_default("CHALLENGE_TTL_SECS", 300)?;
        let admin_challenge_ttl_secs = parse_env_or_default("ADMIN_CHALLENGE_TTL_SECS", 60)?;
        let session_ttl_secs = parse_env_or_default("SESSION_TTL_SECS", 86_400)?;
        let trust_session_ttl_secs = parse_env_or_default("TRUST_SESSION_TTL_SECS", 900)?;
        let sweep_interval_secs = parse_env_or_default("SWEEP_INTERVAL_SECS", 60)?;

        for (name, value) in [
            ("CHALLENGE_TTL_SECS", challenge_ttl_secs),
            ("ADMIN_CHALLENGE_TTL_SECS", admin_challenge_ttl_secs),
            ("SESSION_TTL_SECS", session_ttl_secs),
            ("TRUST_SESSION_TTL_SECS", trust_session_ttl_secs),
            ("SWEEP_INTERVAL_SECS", sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    "must be greater than zero".to_string(),
                ));
            }
            check_duration(name, value)?;
        }

        // PIN fallback
        let pin_max_attempts = parse_env_or_default("PIN_MAX_ATTEMPTS", 5)?;
        if pin_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "PIN_MAX_ATTEMPTS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let pin_lockout_secs = parse_env_or_default("PIN_LOCKOUT_SECS", 900)?;
        check_duration("PIN_LOCKOUT_SECS", pin_lockout_secs)?;

        let audit_capacity = parse_env_or_default("AUDIT_CAPACITY", 1000)?;
        let allow_unbound_siwe = parse_env_or_default("ALLOW_UNBOUND_SIWE", true)?;

        // Rate limiting
        let rate_limit_auth_per_min = parse_env_or_default("RATE_LIMIT_AUTH_PER_MIN", 10)?;
        let rate_limit_admin_per_min = parse_env_or_default("RATE_LIMIT_ADMIN_PER_MIN", 5)?;

        Ok(Config {
            admin_address,
            redis_url,
            chain_rpc_url,
            bind_addr,
            chain_id,
            auth_domain,
            auth_uri,
            challenge_ttl_secs,
            admin_challenge_ttl_secs,
            session_ttl_secs,
            trust_session_ttl_secs,
            sweep_interval_secs,
            pin_max_attempts,
            pin_lockout_secs,
            audit_capacity,
            allow_unbound_siwe,
            rate_limit_auth_per_min,
            rate_limit_admin_per_min,
        })
    }

    /// Settings for the [`Authenticator`](crate::auth::Authenticator).
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            message: MessageContext {
                domain: self.auth_domain.clone(),
                uri: self.auth_uri.clone(),
                chain_id: self.chain_id,
            },
            challenge_ttl_secs: self.challenge_ttl_secs,
            admin_challenge_ttl_secs: self.admin_challenge_ttl_secs,
            session_ttl_secs: self.session_ttl_secs,
            trust_session_ttl_secs: self.trust_session_ttl_secs,
            admin_address: self.admin_address.clone(),
            allow_unbound_structured_login: self.allow_unbound_siwe,
            pin_max_attempts: self.pin_max_attempts,
            pin_lockout_secs: self.pin_lockout_secs,
            audit_capacity: self.audit_capacity,
        }
    }
}

/// Read an environment variable, treating empty as unset.
fn check_duration(key: &str, secs: u64) -> Result<(), ConfigError> {
    if secs > MAX_DURATION_SECS {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be at most {} seconds", MAX_DURATION_SECS),
        ));
    }
    Ok(())
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}
