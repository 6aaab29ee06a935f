//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use cvmatch_core::BillingError;
use cvmatch_store::StoreError;

use crate::stripe::StripeError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the balance changed underneath an optimistic update.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Free allowance spent and no credits left.
    #[error("usage limit reached: {message}")]
    UsageLimitReached {
        /// Human-readable reason.
        message: String,
        /// Extra context for the caller.
        details: serde_json::Value,
    },

    /// A required integration is not configured.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::UsageLimitReached { message, details } => (
                StatusCode::PAYMENT_REQUIRED,
                "usage_limit_reached",
                message.clone(),
                Some(details.clone()),
            ),
            Self::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => {
                tracing::warn!(error = %msg, "External service error");
                (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    msg.clone(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            BillingError::AccountNotFound { user_id } => {
                Self::NotFound(format!("Account not found: {user_id}"))
            }
            BillingError::ConcurrentModification { user_id } => Self::Conflict(format!(
                "Balance of account {user_id} changed concurrently, retry the request"
            )),
            BillingError::UsageLimitReached {
                reason,
                upgrade_suggestion,
            } => Self::UsageLimitReached {
                message: reason,
                details: serde_json::json!({
                    "can_optimize": false,
                    "reason": "limit_reached",
                    "upgrade_suggestion": upgrade_suggestion,
                }),
            },
            BillingError::InvalidAmount(msg) | BillingError::InvalidWebhookPayload(msg) => {
                Self::BadRequest(msg)
            }
            BillingError::InvalidId(e) => Self::BadRequest(e.to_string()),
            BillingError::ExternalService { service, message } => {
                Self::ExternalService(format!("{service}: {message}"))
            }
            BillingError::Storage(msg) | BillingError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        BillingError::from(err).into()
    }
}

impl From<StripeError> for ApiError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::InvalidSignature | StripeError::MalformedSignature(_) => {
                Self::BadRequest("Invalid webhook signature".into())
            }
            StripeError::TimestampOutsideTolerance { .. } => {
                Self::BadRequest("Webhook timestamp outside tolerance".into())
            }
            other => Self::ExternalService(other.to_string()),
        }
    }
}
