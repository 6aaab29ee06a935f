//! Usage and limit handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use cvmatch_core::{TransactionSource, UsageDecision, UserId};

use crate::auth::{AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::ledger::Consumption;
use crate::state::AppState;

/// Usage summary for the signed-in user.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// Month the counters cover (`YYYY-MM`).
    pub month: String,
    /// Free optimizations used this month.
    pub free_optimizations_used: u32,
    /// Free optimizations allowed per month.
    pub free_optimizations_limit: u32,
    /// Paid optimizations this month.
    pub paid_optimizations_used: u32,
    /// Credits available.
    pub credits_remaining: i64,
    /// Unlimited optimizations.
    pub is_pro: bool,
    /// Whether another optimization may run now.
    pub decision: UsageDecision,
}

/// Get the caller's usage for the current month.
pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UsageResponse>, ApiError> {
    let snapshot = state.ledger.check_usage(&auth.user_id).await?;

    Ok(Json(UsageResponse {
        month: snapshot.usage.month.to_string(),
        free_optimizations_used: snapshot.usage.free_optimizations_used,
        free_optimizations_limit: state.ledger.policy().free_monthly_optimizations,
        paid_optimizations_used: snapshot.usage.paid_optimizations_used,
        credits_remaining: snapshot.account.credits_remaining,
        is_pro: snapshot.account.is_pro,
        decision: snapshot.decision,
    }))
}

/// Usage check request from an internal service.
#[derive(Debug, Deserialize)]
pub struct CheckUsageRequest {
    /// User to check.
    pub user_id: UserId,
}

/// Decide whether a user may run an optimization (service only).
///
/// A denial is a normal answer here (`can_optimize = false`), not an error.
pub async fn check_usage(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<CheckUsageRequest>,
) -> Result<Json<UsageDecision>, ApiError> {
    let snapshot = state.ledger.check_usage(&body.user_id).await?;
    Ok(Json(snapshot.decision))
}

/// Consume request from an internal service.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// User running the optimization.
    pub user_id: UserId,
    /// Optimization id, recorded on any credit transaction.
    pub operation_id: String,
}

/// Charge one optimization to a user (service only).
pub async fn consume_optimization(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<ConsumeRequest>,
) -> Result<Json<Consumption>, ApiError> {
    let consumption = state
        .ledger
        .consume_optimization(&body.user_id, TransactionSource::Optimization, &body.operation_id)
        .await?;

    tracing::info!(
        user_id = %body.user_id,
        operation_id = %body.operation_id,
        service = %service.service_name,
        reason = ?consumption.reason,
        credits_charged = consumption.credits_charged,
        "Optimization consumed"
    );

    Ok(Json(consumption))
}
