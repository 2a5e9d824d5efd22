//! Error types and Axum response conversions.

use crate::auth::error::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application error types.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited")]
    RateLimited,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl AppError {
    fn status_code_message(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Internal(msg) => {
                // Log detailed error server-side, return generic message to client
                tracing::error!(error = %msg, "Internal server error");
                internal()
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded".to_string(),
            ),
            AppError::Auth(err) => {
                let status = match err {
                    AuthError::Storage(_) | AuthError::Hashing(_) => {
                        tracing::error!(error = %err, "Internal server error");
                        return internal();
                    }
                    AuthError::NoChallenge
                    | AuthError::ChallengeExpired
                    | AuthError::NonceMismatch
                    | AuthError::SignatureAddressMismatch
                    | AuthError::PinInvalid { .. }
                    | AuthError::PinNotSet
                    | AuthError::SessionExpired
                    | AuthError::SessionNotFound => StatusCode::UNAUTHORIZED,
                    AuthError::PinLocked { .. } => StatusCode::LOCKED,
                    AuthError::InvalidSignatureFormat(_)
                    | AuthError::InvalidPinFormat
                    | AuthError::InvalidAddress(_)
                    | AuthError::MalformedMessage => StatusCode::BAD_REQUEST,
                    AuthError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.code(), err.to_string())
            }
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL",
        "Internal server error".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.status_code_message();

        let mut body = json!({
            "error": message,
            "code": code,
        });
        match &self {
            AppError::Auth(AuthError::PinLocked { seconds_remaining }) => {
                body["seconds_remaining"] = json!(seconds_remaining);
            }
            AppError::Auth(AuthError::PinInvalid { attempts_remaining }) => {
                body["attempts_remaining"] = json!(attempts_remaining);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

// Storage failures outside the authenticator (rate limiting)
impl From<crate::storage::StoreError> for AppError {
    fn from(err: crate::storage::StoreError) -> Self {
        AppError::Internal(format!("Storage error: {}", err))
    }
}
