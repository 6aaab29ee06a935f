//! Idempotent processing of Stripe webhook events.
//!
//! Every delivery is journaled by its Stripe event id before any side effect
//! runs. A journaled id is never dispatched again unless its previous attempt
//! failed or was abandoned mid-flight (its claim lease ran out), in which
//! case exactly one retry reclaims it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use cvmatch_core::{
    BillingError, CreditPack, PricingConfig, Result, SubscriptionTier, UserId, WebhookEvent,
    WebhookStatus,
};
use cvmatch_store::Store;

use crate::ledger::{CreditGrant, CreditLedger};

use super::types::StripeEvent;

/// Side effect applied by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEffect {
    /// Credits were added to an account.
    CreditsGranted {
        /// Recipient.
        user_id: UserId,
        /// Credits added.
        credits: i64,
        /// Balance afterwards.
        balance_after: i64,
    },
    /// The subscription tier changed.
    TierChanged {
        /// Subscriber.
        user_id: UserId,
        /// New tier.
        tier: SubscriptionTier,
    },
    /// A handled event type that needed no change this time.
    Skipped {
        /// Why nothing was applied.
        reason: String,
    },
    /// Logged for operators, no state change.
    Noted,
    /// Event type this service does not handle.
    Ignored,
}

/// What happened to one delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    /// Always `true` once the payload was authentic and parseable.
    pub received: bool,
    /// Whether processing succeeded (or had already succeeded).
    pub success: bool,
    /// Set when the event id was already journaled.
    pub idempotent: bool,
    /// Stripe event id.
    pub event_id: String,
    /// Stripe event type.
    pub event_type: String,
    /// The applied effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<WebhookEffect>,
    /// Processing error, recorded on the journal row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookOutcome {
    fn duplicate(event: &StripeEvent) -> Self {
        Self {
            received: true,
            success: true,
            idempotent: true,
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            effect: None,
            error: None,
        }
    }
}

/// How long a delivery owns a `logged` row before a retry may take it over.
pub const DEFAULT_CLAIM_LEASE_SECONDS: i64 = 60;

/// Journals and dispatches Stripe events.
#[derive(Clone)]
pub struct StripeEventProcessor {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    pricing: PricingConfig,
    claim_lease: Duration,
}

impl StripeEventProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ledger: CreditLedger, pricing: PricingConfig) -> Self {
        Self {
            store,
            ledger,
            pricing,
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECONDS),
        }
    }

    /// Set the claim lease. Keep it longer than the request timeout so a
    /// live delivery is never taken over.
    #[must_use]
    pub const fn with_claim_lease(mut self, claim_lease: Duration) -> Self {
        self.claim_lease = claim_lease;
        self
    }

    /// Process one delivery. `payload` is the raw event, stored on the
    /// journal row.
    ///
    /// Dispatch errors are recorded on the journal row and reported in the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns an error only if the journal itself cannot be read or
    /// written, so the provider retries the delivery.
    pub async fn process(&self, event: StripeEvent, payload: Value) -> Result<WebhookOutcome> {
        if !self.claim(&event, payload).await? {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate Stripe webhook ignored"
            );
            return Ok(WebhookOutcome::duplicate(&event));
        }

        let started = Instant::now();
        let result = self.dispatch(&event).await;
        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let (effect, error) = match result {
            Ok(effect) => {
                if let Err(e) = self
                    .store
                    .mark_webhook_processed(&event.id, elapsed_ms)
                    .await
                {
                    warn!(event_id = %event.id, error = %e, "Failed to mark webhook processed");
                }
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    elapsed_ms,
                    "Stripe webhook processed"
                );
                (Some(effect), None)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %message,
                    "Stripe webhook processing failed"
                );
                if let Err(e) = self
                    .store
                    .mark_webhook_failed(&event.id, &message, elapsed_ms)
                    .await
                {
                    warn!(event_id = %event.id, error = %e, "Failed to mark webhook failed");
                }
                (None, Some(message))
            }
        };

        Ok(WebhookOutcome {
            received: true,
            success: error.is_none(),
            idempotent: false,
            event_id: event.id,
            event_type: event.event_type,
            effect,
            error,
        })
    }

    /// Journal the event, returning `false` if another delivery owns it.
    async fn claim(&self, event: &StripeEvent, payload: Value) -> Result<bool> {
        if let Some(existing) = self.store.get_webhook_event(&event.id).await? {
            let stale_before = WebhookEvent::lease_cutoff(self.claim_lease);
            if !existing.is_reclaimable(stale_before) {
                return Ok(false);
            }

            let claimed = self
                .store
                .claim_webhook_event(&event.id, stale_before)
                .await?;
            if claimed {
                info!(
                    event_id = %event.id,
                    previous_status = %existing.status,
                    "Reprocessing Stripe webhook"
                );
            }
            return Ok(claimed);
        }

        let mut row = WebhookEvent::received(&event.id, &event.event_type, payload);
        row.transition(WebhookStatus::Logged);
        Ok(self.store.insert_webhook_event(&row).await?)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    async fn dispatch(&self, event: &StripeEvent) -> Result<WebhookEffect> {
        let object = &event.data.object;
        match event.event_type.as_str() {
            "checkout.session.completed" => self.checkout_completed(object).await,
            "payment_intent.succeeded" => self.payment_succeeded(object).await,
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.subscription_changed(object).await
            }
            "customer.subscription.deleted" => {
                let user_id = require_user(object)?;
                self.set_tier(user_id, SubscriptionTier::Free).await
            }
            "invoice.payment_failed" => {
                warn!(
                    invoice_id = str_field(object, "id").unwrap_or("unknown"),
                    customer = str_field(object, "customer").unwrap_or("unknown"),
                    "Stripe invoice payment failed"
                );
                Ok(WebhookEffect::Noted)
            }
            other => {
                debug!(event_type = %other, "Unhandled Stripe event");
                Ok(WebhookEffect::Ignored)
            }
        }
    }

    async fn checkout_completed(&self, session: &Value) -> Result<WebhookEffect> {
        let user_id = require_user(session)?;

        if str_field(session, "mode") == Some("subscription") {
            let tier = metadata_tier(session)?;
            return self.set_tier(user_id, tier).await;
        }

        let payment_status = str_field(session, "payment_status").unwrap_or("unknown");
        if payment_status != "paid" {
            return Ok(WebhookEffect::Skipped {
                reason: format!("payment status is {payment_status}"),
            });
        }

        let (credits, description) = self.purchased_credits(session)?.ok_or_else(|| {
            BillingError::InvalidWebhookPayload("checkout session has no credits or pack".into())
        })?;
        let session_id = str_field(session, "id").unwrap_or("unknown");
        self.grant(user_id, credits, session_id, description).await
    }

    async fn payment_succeeded(&self, intent: &Value) -> Result<WebhookEffect> {
        let Some(user_id) = user_from(intent)? else {
            return Ok(WebhookEffect::Skipped {
                reason: "payment intent has no user_id metadata".into(),
            });
        };
        let Some((credits, description)) = self.purchased_credits(intent)? else {
            return Ok(WebhookEffect::Skipped {
                reason: "payment intent has no credits metadata".into(),
            });
        };
        let intent_id = str_field(intent, "id").unwrap_or("unknown");
        self.grant(user_id, credits, intent_id, description).await
    }

    async fn subscription_changed(&self, subscription: &Value) -> Result<WebhookEffect> {
        let user_id = require_user(subscription)?;
        let status = str_field(subscription, "status").unwrap_or("unknown");

        let tier = match status {
            "active" | "trialing" => metadata_tier(subscription)?,
            "canceled" | "unpaid" | "incomplete_expired" => SubscriptionTier::Free,
            other => {
                return Ok(WebhookEffect::Skipped {
                    reason: format!("subscription status is {other}"),
                });
            }
        };
        self.set_tier(user_id, tier).await
    }

    /// Credits from `metadata.credits`, else the size of `metadata.pack`.
    fn purchased_credits(&self, object: &Value) -> Result<Option<(i64, String)>> {
        let metadata = object.get("metadata");

        let pack = metadata
            .and_then(|m| m.get("pack"))
            .and_then(Value::as_str)
            .map(|p| {
                CreditPack::from_str(p)
                    .map_err(|e| BillingError::InvalidWebhookPayload(e.to_string()))
            })
            .transpose()?;

        let credits = match metadata.and_then(|m| m.get("credits")) {
            Some(value) => Some(parse_credits(value)?),
            None => pack
                .and_then(|p| self.pricing.offer(p))
                .map(|offer| offer.credits),
        };

        Ok(credits.map(|credits| {
            let description = pack.map_or_else(
                || format!("Purchased {credits} credits"),
                |p| format!("Purchased {p} pack ({credits} credits)"),
            );
            (credits, description)
        }))
    }

    async fn grant(
        &self,
        user_id: UserId,
        credits: i64,
        reference: &str,
        description: String,
    ) -> Result<WebhookEffect> {
        self.ledger.account(&user_id).await?;
        let addition = self
            .ledger
            .add_credits(
                CreditGrant::purchase(user_id, credits, reference, description)
                    .with_metadata(serde_json::json!({ "stripe_object_id": reference })),
            )
            .await?;
        Ok(WebhookEffect::CreditsGranted {
            user_id,
            credits,
            balance_after: addition.balance_after,
        })
    }

    async fn set_tier(&self, user_id: UserId, tier: SubscriptionTier) -> Result<WebhookEffect> {
        self.ledger.account(&user_id).await?;
        let account = self.store.set_subscription(&user_id, tier).await?;
        info!(user_id = %user_id, tier = tier.as_str(), "Subscription tier updated");
        Ok(WebhookEffect::TierChanged {
            user_id,
            tier: account.subscription_tier,
        })
    }
}

// =========================================================================
// Payload helpers
// =========================================================================

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

fn metadata_str<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object
        .get("metadata")
        .and_then(|m| m.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// `metadata.user_id`, else `client_reference_id`.
fn user_from(object: &Value) -> Result<Option<UserId>> {
    metadata_str(object, "user_id")
        .or_else(|| str_field(object, "client_reference_id").filter(|s| !s.is_empty()))
        .map(|raw| {
            UserId::from_str(raw).map_err(|_| {
                BillingError::InvalidWebhookPayload(format!("invalid user id: {raw}"))
            })
        })
        .transpose()
}

fn require_user(object: &Value) -> Result<UserId> {
    user_from(object)?
        .ok_or_else(|| BillingError::InvalidWebhookPayload("missing user_id metadata".into()))
}

fn metadata_tier(object: &Value) -> Result<SubscriptionTier> {
    metadata_str(object, "tier").map_or(Ok(SubscriptionTier::Pro), |raw| {
        SubscriptionTier::from_str(raw)
            .map_err(|e| BillingError::InvalidWebhookPayload(e.to_string()))
    })
}

/// Stripe metadata values are strings, but accept numbers too.
fn parse_credits(value: &Value) -> Result<i64> {
    let credits = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| BillingError::InvalidWebhookPayload(format!("invalid credits: {value}")))?;

    if credits <= 0 {
        return Err(BillingError::InvalidWebhookPayload(format!(
            "credits must be positive, got {credits}"
        )));
    }
    Ok(credits)
}
