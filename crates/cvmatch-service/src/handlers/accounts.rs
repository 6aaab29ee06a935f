//! Account handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// User ID.
    pub user_id: String,
    /// Credits available.
    pub credits_remaining: i64,
    /// Lifetime credits granted or purchased.
    pub total_credits: i64,
    /// Subscription tier.
    pub subscription_tier: &'static str,
    /// Unlimited optimizations.
    pub is_pro: bool,
    /// Creation timestamp.
    pub created_at: String,
}

/// Get the caller's account, creating it on first access.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.account(&auth.user_id).await?;

    Ok(Json(AccountResponse {
        user_id: account.user_id.to_string(),
        credits_remaining: account.credits_remaining,
        total_credits: account.total_credits,
        subscription_tier: account.subscription_tier.as_str(),
        is_pro: account.is_pro,
        created_at: account.created_at.to_rfc3339(),
    }))
}
