use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::booking::{BookingState, TransitionKind};

/// Why a presented QR token was rejected.
///
/// Never shown to the scanning client; every variant renders as
/// "invalid code".
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationError {
    /// The token is not `payload.mac` in base64url.
    #[error("malformed token")]
    MalformedToken,

    /// The MAC does not match under any accepted secret.
    #[error("bad signature")]
    BadSignature,

    /// The signed bytes do not decode to a payload.
    #[error("malformed payload")]
    MalformedPayload,

    /// The token's validity window has passed.
    #[error("token expired")]
    Expired,

    /// The token was used, revoked, or superseded by a reissue.
    #[error("token revoked")]
    Revoked,

    /// The token was presented at a venue it was not issued for.
    #[error("token presented at the wrong venue")]
    VenueMismatch,

    /// The token was issued for a different booking.
    #[error("token belongs to another booking")]
    BookingMismatch,
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Bad input from the caller.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A state guard rejected the transition.
    #[error("Cannot {attempted} a booking in state {from}")]
    InvalidTransition {
        from: BookingState,
        attempted: TransitionKind,
    },

    /// The booking was already processed with a different idempotency key.
    #[error("Booking {0} was already processed")]
    AlreadyProcessed(Uuid),

    /// The presented QR token was rejected.
    #[error("QR verification failed: {0}")]
    Verification(#[from] VerificationError),

    /// Check-in attempted before the access window opens.
    #[error("Access window has not started yet")]
    NotYetValid,

    /// Check-in attempted after the access window closed.
    #[error("Access window has ended")]
    Expired,

    /// The payment provider refused the charge or refund.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// The payment gateway failed.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::InvalidTransition { from, attempted } => {
                tracing::info!("Rejected transition {} from {}", attempted, from);
                (
                    StatusCode::CONFLICT,
                    format!("Cannot {} a booking in state {}", attempted, from),
                )
            }

            AppError::AlreadyProcessed(id) => {
                tracing::info!("Booking {} already processed", id);
                (StatusCode::CONFLICT, "Booking already processed".to_string())
            }

            AppError::Verification(reason) => {
                tracing::warn!("QR rejected: {}", reason);
                (StatusCode::FORBIDDEN, "invalid code".to_string())
            }

            AppError::NotYetValid => (
                StatusCode::FORBIDDEN,
                "Access window has not started yet".to_string(),
            ),

            AppError::Expired => (StatusCode::FORBIDDEN, "Access window has ended".to_string()),

            AppError::PaymentDeclined(ref reason) => {
                tracing::warn!("Payment declined: {}", reason);
                (StatusCode::PAYMENT_REQUIRED, "Payment declined".to_string())
            }

            AppError::ExternalService(ref msg) => {
                tracing::error!("External service error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Payment provider unavailable, try again".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}
