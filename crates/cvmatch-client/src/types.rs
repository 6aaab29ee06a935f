//! Request and response types for the billing client.

use serde::{Deserialize, Serialize};

use cvmatch_core::{UsageReason, UserId};

pub use cvmatch_core::UsageDecision;

/// Deduction request.
#[derive(Debug, Clone, Serialize)]
pub struct DeductRequest {
    /// Account to charge.
    pub user_id: UserId,
    /// Credits to deduct.
    pub amount: i64,
    /// Caller's operation id.
    pub operation_id: String,
}

/// Deduction result.
#[derive(Debug, Clone, Deserialize)]
pub struct DeductResponse {
    /// Credits removed.
    pub amount: i64,
    /// Balance after the deduction.
    pub balance_after: i64,
    /// Caller's operation id.
    pub operation_id: String,
    /// Ledger entry, absent if the server could not record it.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// `atomic` or `optimistic`.
    pub path: String,
}

/// Refund request.
#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    /// Account to credit.
    pub user_id: UserId,
    /// Credits to return.
    pub amount: i64,
    /// Operation whose charge is returned.
    pub operation_id: String,
    /// Why.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of a credit addition (refund).
#[derive(Debug, Clone, Deserialize)]
pub struct CreditAdditionResponse {
    /// Credits added.
    pub amount: i64,
    /// Balance after the addition.
    pub balance_after: i64,
    /// Ledger entry, absent if the server could not record it.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Usage request for one user.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct UserRequest<'a> {
    pub user_id: &'a UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<&'a str>,
}

/// A consumed optimization.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeResponse {
    /// How it was paid for.
    pub reason: UsageReason,
    /// Credits deducted.
    pub credits_charged: i64,
    /// Balance after the charge.
    pub credits_remaining: i64,
}

/// Balance response.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// Credits available.
    pub credits_remaining: i64,
    /// Lifetime credits granted or purchased.
    pub total_credits: i64,
    /// Unlimited optimizations.
    pub is_pro: bool,
    /// Subscription tier.
    pub subscription_tier: String,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
