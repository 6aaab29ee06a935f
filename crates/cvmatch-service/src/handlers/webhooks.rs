//! Stripe webhook handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use cvmatch_core::WebhookEvent;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{verify_signature, StripeEvent, WebhookOutcome};

/// Handle Stripe webhooks.
///
/// Answers 200 for every authentic, parseable delivery, including ones whose
/// processing failed; the failure is reported in the body and on the journal
/// row so a provider retry reprocesses it.
///
/// The one exception is a journal that cannot be read or written: that
/// answers 500, since acknowledging an unjournaled event would lose it.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookOutcome>, ApiError> {
    if let Some(secret) = &state.config.stripe_webhook_secret {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

        verify_signature(
            &body,
            signature,
            secret,
            state.config.webhook_tolerance_seconds,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "Rejected Stripe webhook");
            ApiError::from(e)
        })?;
    } else {
        // Development mode
        tracing::warn!("Stripe webhook secret not configured - skipping signature verification");
    }

    let payload: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed webhook payload: {e}")))?;
    let event: StripeEvent = serde_json::from_value(payload.clone())
        .map_err(|e| ApiError::BadRequest(format!("Not a Stripe event: {e}")))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    Ok(Json(state.webhooks.process(event, payload).await?))
}

/// Inspect a journaled webhook event (admin only).
pub async fn get_webhook_event(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(event_id): Path<String>,
) -> Result<Json<WebhookEvent>, ApiError> {
    state
        .store
        .get_webhook_event(&event_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Webhook event not found: {event_id}")))
}
