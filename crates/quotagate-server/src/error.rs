use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use quotagate_core::{Decision, DenyReason, GateError};

/// Application-level errors that map directly to HTTP responses.
///
/// Every variant implements [`IntoResponse`] so Axum handlers can use
/// `Result<impl IntoResponse, AppError>` as their return type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited { retry_after_seconds: u64 },

    /// Neither the subscription allowance nor any ticket covers the request.
    #[error("quota exceeded")]
    QuotaExceeded,

    /// Lost the race for the last unit twice in a row.
    #[error("contention")]
    Contention,

    /// Consumption could not be recorded; the operation must not run.
    #[error("commit failure: {0}")]
    CommitFailure(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Map a denied [`Decision`] to its HTTP error. `None` when allowed.
    pub fn from_denial(decision: &Decision) -> Option<Self> {
        if decision.allowed {
            return None;
        }
        Some(match decision.reason {
            Some(DenyReason::RateLimited) => AppError::RateLimited {
                retry_after_seconds: decision.retry_after_secs.unwrap_or(1),
            },
            Some(DenyReason::Contention) => AppError::Contention,
            Some(DenyReason::QuotaExceeded) | None => AppError::QuotaExceeded,
        })
    }
}

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Unauthenticated => AppError::Unauthorized,
            e @ GateError::CommitFailure { .. } => AppError::CommitFailure(e.to_string()),
            GateError::Storage(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, retry_after_seconds) = match &self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg.as_str(),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized",
                None,
            ),
            AppError::RateLimited {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests, slow down and retry shortly",
                Some(*retry_after_seconds),
            ),
            AppError::QuotaExceeded => (
                StatusCode::PAYMENT_REQUIRED,
                "quota_exceeded",
                "Usage limit reached. Upgrade your plan or buy a ticket to continue.",
                None,
            ),
            AppError::Contention => (
                StatusCode::CONFLICT,
                "contention",
                "Another request used the last remaining unit, please retry",
                None,
            ),
            AppError::CommitFailure(detail) => {
                tracing::error!(error = %detail, "Consumption commit failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "commit_failure",
                    "Could not record usage, please retry",
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                    None,
                )
            }
        };

        let mut response = (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                    "field": null
                }
            })),
        )
            .into_response();

        if let Some(retry_after_seconds) = retry_after_seconds {
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }

        response
    }
}
