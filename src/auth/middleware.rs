//! Axum extractors for authentication and rate limiting.

use crate::auth::error::AuthError;
use crate::auth::Authenticator;
use crate::cleanup::RATE_LIMIT_WINDOW_SECS;
use crate::config::Config;
use crate::error::AppError;
use crate::storage::{RateLimitStore, StoreError};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
    pub config: Arc<Config>,
    pub rate_limits: Arc<dyn RateLimitStore>,
}

/// Token from an `Authorization: Bearer {token}` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authenticated app session extractor.
///
/// Extracts session from `Authorization: Bearer {token}` header.
/// Returns 401 Unauthorized if missing, unknown, or expired.
pub struct AuthSession {
    pub wallet: String,
    pub token: String,
    pub expires_at: u64,
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?
            .to_string();

        let session = state.auth.resolve_app_session(&token).await?;

        Ok(AuthSession {
            wallet: session.wallet,
            token,
            expires_at: session.expires_at,
        })
    }
}

/// Privileged session extractor.
///
/// Accepts only a live trust session belonging to the configured privileged
/// address. Returns 401 for a missing or dead token, 403 for a valid trust
/// session held by anyone else.
pub struct PrivilegedSession {
    pub token: String,
}

impl FromRequestParts<AppState> for PrivilegedSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers);
        let check = state.auth.check_privilege(token).await?;

        match (check.is_privileged, token) {
            (true, Some(token)) => Ok(PrivilegedSession {
                token: token.to_string(),
            }),
            _ => Err(match check.reason.as_str() {
                "not_configured" => AppError::Auth(AuthError::NotConfigured),
                "not_privileged" => AppError::Forbidden("Privileged session required".to_string()),
                "missing_token" => {
                    AppError::Unauthorized("Missing authorization header".to_string())
                }
                _ => AppError::Unauthorized("Invalid or expired session".to_string()),
            }),
        }
    }
}

/// Count a request and report whether it is within `max` per window.
///
/// # Returns
/// * `Ok(true)` if under limit
/// * `Ok(false)` if limit exceeded
pub async fn check_rate_limit(
    store: &dyn RateLimitStore,
    key: &str,
    max: u32,
    now: u64,
) -> Result<bool, StoreError> {
    let count = store.hit(key, RATE_LIMIT_WINDOW_SECS, now).await?;
    Ok(count <= max)
}

/// Rate limit by client IP within a named budget (`auth`, `admin`, `pin`).
pub async fn enforce_rate_limit(
    state: &AppState,
    scope: &str,
    ip: IpAddr,
    max: u32,
) -> Result<(), AppError> {
    let key = format!("{}:{}", scope, ip);
    let allowed =
        check_rate_limit(state.rate_limits.as_ref(), &key, max, state.auth.now()).await?;

    if !allowed {
        let mut hasher = std::hash::DefaultHasher::new();
        ip.hash(&mut hasher);
        let ip_hash = format!("{:x}", hasher.finish());
        tracing::warn!(action = "rate_limited", scope = %scope, ip_hash = %ip_hash, "Rate limit exceeded");
        return Err(AppError::RateLimited);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRateLimitStore;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_check_rate_limit() {
        let store = MemoryRateLimitStore::default();

        // First three requests succeed
        for _ in 0..3 {
            assert!(check_rate_limit(&store, "auth:10.0.0.1", 3, 100).await.unwrap());
        }

        // Fourth request fails (over limit)
        assert!(!check_rate_limit(&store, "auth:10.0.0.1", 3, 100).await.unwrap());

        // Other keys have their own budget
        assert!(check_rate_limit(&store, "admin:10.0.0.1", 3, 100).await.unwrap());

        // Next window starts fresh
        assert!(check_rate_limit(&store, "auth:10.0.0.1", 3, 160).await.unwrap());
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer tok+en/="));
        assert_eq!(bearer_token(&headers), Some("tok+en/="));
    }
}
