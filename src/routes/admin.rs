//! Privileged verification endpoints.
//!
//! `challenge`, `verify` and `check` are open; `logout` and `audit` require a
//! [`PrivilegedSession`].

use crate::auth::address::truncate_address;
use crate::auth::middleware::{bearer_token, enforce_rate_limit, AppState, PrivilegedSession};
use crate::error::AppError;
use crate::models::{AuditQuery, ChallengeRequest, VerifyRequest};
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::net::SocketAddr;

const DEFAULT_AUDIT_LIMIT: usize = 100;

/// POST /api/admin/challenge — Request a privileged challenge
pub async fn request_challenge(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<ChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    enforce_rate_limit(&state, "admin", addr.ip(), state.config.rate_limit_admin_per_min).await?;

    let challenge = state.auth.issue_privileged_challenge(&req.address).await?;

    Ok(Json(challenge))
}

/// POST /api/admin/verify — Verify a privileged challenge, mint a trust session
pub async fn verify_challenge(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<VerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    enforce_rate_limit(&state, "admin", addr.ip(), state.config.rate_limit_admin_per_min).await?;

    let response = state
        .auth
        .verify_privileged(&req.address, &req.nonce, &req.signature)
        .await
        .inspect_err(|e| {
            tracing::warn!(action = "admin_verify_failed", address = %truncate_address(&req.address), code = e.code(), "Privileged verification rejected");
        })?;

    tracing::info!(action = "admin_verify_success", address = %truncate_address(&req.address), "Trust session issued");

    Ok(Json(response))
}

/// GET /api/admin/check — Report whether the bearer holds privilege
///
/// Always 200; the body says why privilege was denied.
pub async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let check = state.auth.check_privilege(bearer_token(&headers)).await?;
    Ok(Json(check))
}

/// POST /api/admin/logout — Revoke the caller's trust session
pub async fn logout(
    session: PrivilegedSession,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.revoke_privileged(&session.token).await?;

    tracing::info!(action = "admin_logout", "Trust session revoked");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/admin/audit?limit=N — Most recent audit events, oldest first
pub async fn audit(
    _session: PrivilegedSession,
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    if limit == 0 {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }

    let events = state.auth.audit().recent(limit);

    Ok(Json(serde_json::json!({
        "events": events,
        "capacity": state.auth.audit().capacity(),
    })))
}
