//! Credit balance, deduction and transaction handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use cvmatch_core::{CreditTransaction, TransactionSource, UserId};

use crate::auth::{AdminAuth, AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::ledger::{CreditAddition, CreditGrant, Deduction};
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Credits available.
    pub credits_remaining: i64,
    /// Lifetime credits granted or purchased.
    pub total_credits: i64,
    /// Unlimited optimizations.
    pub is_pro: bool,
    /// Subscription tier.
    pub subscription_tier: &'static str,
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.ledger.account(&auth.user_id).await?;

    Ok(Json(BalanceResponse {
        credits_remaining: account.credits_remaining,
        total_credits: account.total_credits,
        is_pro: account.is_pro,
        subscription_tier: account.subscription_tier.as_str(),
    }))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

const fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Credits (positive = added, negative = deducted).
    pub amount: i64,
    /// Transaction type.
    pub transaction_type: &'static str,
    /// Who initiated it.
    pub source: String,
    /// Caller's operation or payment reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            transaction_type: tx.transaction_type.as_str(),
            source: tx.source.to_string(),
            operation_id: tx.operation_id.clone(),
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let transactions = state
        .store
        .list_transactions(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let transactions = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Admin credit grant request.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// Recipient.
    pub user_id: UserId,
    /// Credits to add.
    pub amount: i64,
    /// Reason, recorded on the transaction.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Add bonus credits (admin only).
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AddCreditsRequest>,
) -> Result<Json<CreditAddition>, ApiError> {
    state.ledger.account(&body.user_id).await?;

    let reason = body
        .reason
        .unwrap_or_else(|| format!("Granted by {}", admin.admin_id));
    let grant = CreditGrant::bonus(body.user_id, body.amount, reason)
        .with_metadata(serde_json::json!({ "admin_id": admin.admin_id }));

    Ok(Json(state.ledger.add_credits(grant).await?))
}

/// Deduction request from an internal service.
#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// Account to charge.
    pub user_id: UserId,
    /// Credits to deduct (default: 1).
    #[serde(default = "default_amount")]
    pub amount: i64,
    /// Caller's operation id, recorded on the transaction.
    pub operation_id: String,
}

const fn default_amount() -> i64 {
    1
}

/// Deduct credits (service only).
pub async fn deduct_credits(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<DeductRequest>,
) -> Result<Json<Deduction>, ApiError> {
    tracing::debug!(
        user_id = %body.user_id,
        amount = body.amount,
        service = %service.service_name,
        "Deduct request"
    );

    let deduction = state
        .ledger
        .deduct(
            &body.user_id,
            body.amount,
            TransactionSource::Service(service.service_name),
            &body.operation_id,
        )
        .await?;

    Ok(Json(deduction))
}

/// Refund request from an internal service.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Account to credit.
    pub user_id: UserId,
    /// Credits to return.
    pub amount: i64,
    /// The operation whose charge is being returned.
    pub operation_id: String,
    /// Why.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Refund credits for a failed operation (service only).
pub async fn refund_credits(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<RefundRequest>,
) -> Result<Json<CreditAddition>, ApiError> {
    let reason = body
        .reason
        .unwrap_or_else(|| format!("Refund for {}", body.operation_id));

    let grant = CreditGrant::refund(
        body.user_id,
        body.amount,
        TransactionSource::Service(service.service_name),
        body.operation_id,
        reason,
    );

    Ok(Json(state.ledger.add_credits(grant).await?))
}
