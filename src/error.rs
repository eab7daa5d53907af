use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::money::MoneyError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Course is not available for purchase")]
    InvalidCourse,

    #[error("Already enrolled in this course")]
    AlreadyEnrolled,

    #[error("A payment for this course is already in progress")]
    PendingPaymentExists,

    #[error("Illegal payment state transition: {0}")]
    StateConflict(String),

    #[error("Refund not allowed: {0}")]
    RefundNotAllowed(String),

    #[error("Invalid refund amount: {0}")]
    InvalidRefundAmount(String),

    #[error("Refund window has expired")]
    RefundWindowExpired,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MoneyError> for AppError {
    fn from(e: MoneyError) -> Self {
        AppError::InvalidAmount(e.to_string())
    }
}

/// Structured error body: `code` is a stable machine-readable reason the
/// client can branch on, `details` is human-oriented and optional.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// Stable reason code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::InvalidCourse => "INVALID_COURSE",
            AppError::AlreadyEnrolled => "ALREADY_ENROLLED",
            AppError::PendingPaymentExists => "PENDING_PAYMENT",
            AppError::StateConflict(_) => "STATE_CONFLICT",
            AppError::RefundNotAllowed(_) => "REFUND_NOT_ALLOWED",
            AppError::InvalidRefundAmount(_) => "INVALID_REFUND_AMOUNT",
            AppError::RefundWindowExpired => "REFUND_WINDOW_EXPIRED",
            AppError::InvalidAmount(_) => "INVALID_AMOUNT",
            AppError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => "INTERNAL",
            AppError::Json(_) => "INVALID_JSON",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", Some(msg.clone())),
            AppError::InvalidCourse => (
                StatusCode::BAD_REQUEST,
                "Course is not available for purchase",
                None,
            ),
            AppError::AlreadyEnrolled => (
                StatusCode::CONFLICT,
                "Already enrolled in this course",
                None,
            ),
            AppError::PendingPaymentExists => (
                StatusCode::CONFLICT,
                "A payment for this course is already in progress",
                None,
            ),
            AppError::StateConflict(msg) => {
                (StatusCode::CONFLICT, "State conflict", Some(msg.clone()))
            }
            AppError::RefundNotAllowed(msg) => {
                (StatusCode::CONFLICT, "Refund not allowed", Some(msg.clone()))
            }
            AppError::InvalidRefundAmount(msg) => (
                StatusCode::BAD_REQUEST,
                "Invalid refund amount",
                Some(msg.clone()),
            ),
            AppError::RefundWindowExpired => {
                (StatusCode::CONFLICT, "Refund window has expired", None)
            }
            AppError::InvalidAmount(msg) => {
                (StatusCode::BAD_REQUEST, "Invalid amount", Some(msg.clone()))
            }
            AppError::ProviderUnavailable(msg) => {
                tracing::error!("Provider unavailable: {}", msg);
                (StatusCode::BAD_GATEWAY, "Payment provider unavailable", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                )
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Convert Option to a NotFound error with a message.
pub trait OptionExt<T> {
    fn or_not_found(self, what: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, what: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(what.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
