//! API route handlers.

pub mod admin;
pub mod auth;
pub mod pin;

use crate::auth::middleware::AppState;
use axum::{
    routing::{delete, get, post},
    Json, Router,
};

/// GET /health — Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Login endpoints
        .route("/api/auth/challenge", post(auth::request_challenge))
        .route("/api/auth/verify", post(auth::verify_challenge))
        .route("/api/auth/siwe", post(auth::verify_siwe))
        .route("/api/auth/session", get(auth::get_session))
        .route("/api/auth/logout", post(auth::logout))
        // Privileged endpoints
        .route("/api/admin/challenge", post(admin::request_challenge))
        .route("/api/admin/verify", post(admin::verify_challenge))
        .route("/api/admin/check", get(admin::check))
        .route("/api/admin/logout", post(admin::logout))
        .route("/api/admin/audit", get(admin::audit))
        // PIN endpoints
        .route("/api/pin/setup", post(pin::setup))
        .route("/api/pin/verify", post(pin::verify))
        .route("/api/pin", delete(pin::reset))
}
