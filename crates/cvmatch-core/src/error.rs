//! Error types for CV-Match billing.

use crate::ids::IdError;

/// Result type for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Insufficient credits for the operation.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance in credits.
        balance: i64,
        /// Required amount in credits.
        required: i64,
    },

    /// Account not found.
    #[error("account not found: {user_id}")]
    AccountNotFound {
        /// The user ID that was not found.
        user_id: String,
    },

    /// The optimistic balance update lost every attempt to a concurrent writer.
    #[error("concurrent modification of account {user_id}")]
    ConcurrentModification {
        /// The contended account.
        user_id: String,
    },

    /// The monthly usage limit is exhausted and no credits remain.
    #[error("usage limit reached: {reason}")]
    UsageLimitReached {
        /// Human-readable reason.
        reason: String,
        /// Suggested upgrade path, if any.
        upgrade_suggestion: Option<String>,
    },

    /// Webhook payload is missing data required to apply it.
    #[error("invalid webhook payload: {0}")]
    InvalidWebhookPayload(String),

    /// External service error (Stripe).
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// A string did not name a known variant of a stored enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Which enumeration was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl From<ParseEnumError> for BillingError {
    fn from(err: ParseEnumError) -> Self {
        Self::Serialization(err.to_string())
    }
}
