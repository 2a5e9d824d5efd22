//! Login API endpoints.

use crate::auth::address::truncate_address;
use crate::auth::middleware::{enforce_rate_limit, AppState, AuthSession};
use crate::error::AppError;
use crate::models::{
    ChallengeRequest, SessionInfo, SessionKind, StructuredVerifyRequest, VerifyRequest,
};
use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::net::SocketAddr;

/// POST /api/auth/challenge — Request challenge nonce and message
pub async fn request_challenge(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<ChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    enforce_rate_limit(&state, "auth", addr.ip(), state.config.rate_limit_auth_per_min).await?;

    let challenge = state.auth.issue_challenge(&req.address).await?;

    Ok(Json(challenge))
}

/// POST /api/auth/verify — Verify signature and create session
pub async fn verify_challenge(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<VerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    enforce_rate_limit(&state, "auth", addr.ip(), state.config.rate_limit_auth_per_min).await?;

    let response = state
        .auth
        .verify_login(&req.address, &req.nonce, &req.signature)
        .await
        .inspect_err(|e| {
            tracing::warn!(action = "auth_failed", address = %truncate_address(&req.address), code = e.code(), "Login rejected");
        })?;

    tracing::info!(action = "auth_success", address = %truncate_address(&response.identity.address), identity = %response.identity.id, "Wallet authenticated");

    Ok(Json(response))
}

/// POST /api/auth/siwe — Verify a client-formatted sign-in message
pub async fn verify_siwe(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<StructuredVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    enforce_rate_limit(&state, "auth", addr.ip(), state.config.rate_limit_auth_per_min).await?;

    let response = state
        .auth
        .verify_structured_message(&req.address, &req.message, &req.signature)
        .await
        .inspect_err(|e| {
            tracing::warn!(action = "siwe_failed", address = %truncate_address(&req.address), code = e.code(), "Sign-in message rejected");
        })?;

    tracing::info!(action = "siwe_success", address = %truncate_address(&response.identity.address), identity = %response.identity.id, "Wallet authenticated");

    Ok(Json(response))
}

/// GET /api/auth/session — Describe the caller's session
pub async fn get_session(session: AuthSession) -> Result<impl IntoResponse, AppError> {
    Ok(Json(SessionInfo {
        wallet: session.wallet,
        kind: SessionKind::App,
        expires_at: session.expires_at,
    }))
}

/// POST /api/auth/logout — Invalidate current session
pub async fn logout(
    session: AuthSession,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.revoke_app_session(&session.token).await?;

    tracing::info!(action = "logout", wallet = %truncate_address(&session.wallet), "Wallet logged out");

    Ok(StatusCode::NO_CONTENT)
}
