//! PIN fallback endpoints.

use crate::auth::address::truncate_address;
use crate::auth::middleware::{enforce_rate_limit, AppState, AuthSession};
use crate::error::AppError;
use crate::models::{PinSetupRequest, PinVerifyRequest};
use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::net::SocketAddr;

/// POST /api/pin/setup — Set or replace the PIN for the session's wallet
pub async fn setup(
    session: AuthSession,
    State(state): State<AppState>,
    Json(req): Json<PinSetupRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.pin_setup(&session.wallet, &req.pin).await?;

    tracing::info!(action = "pin_setup", wallet = %truncate_address(&session.wallet), "PIN configured");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/pin/verify — Log in with a PIN
pub async fn verify(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<PinVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    enforce_rate_limit(&state, "pin", addr.ip(), state.config.rate_limit_auth_per_min).await?;

    let response = state
        .auth
        .pin_verify(&req.address, &req.pin)
        .await
        .inspect_err(|e| {
            tracing::warn!(action = "pin_failed", address = %truncate_address(&req.address), code = e.code(), "PIN rejected");
        })?;

    tracing::info!(action = "pin_success", address = %truncate_address(&response.identity.address), "Wallet authenticated by PIN");

    Ok(Json(response))
}

/// DELETE /api/pin — Remove the PIN for the session's wallet
pub async fn reset(
    session: AuthSession,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let removed = state.auth.pin_reset(&session.wallet).await?;

    tracing::info!(action = "pin_reset", wallet = %truncate_address(&session.wallet), removed, "PIN removed");

    Ok(Json(serde_json::json!({ "removed": removed })))
}
