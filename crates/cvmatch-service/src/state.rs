//! Application state.

use std::sync::Arc;

use cvmatch_store::Store;

use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::ledger::CreditLedger;
use crate::stripe::{StripeClient, StripeEventProcessor, DEFAULT_CLAIM_LEASE_SECONDS};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client for payments (optional).
    pub stripe: Option<Arc<StripeClient>>,

    /// Credit and usage operations.
    pub ledger: CreditLedger,

    /// Webhook journal and dispatch.
    pub webhooks: StripeEventProcessor,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let stripe = config.stripe_api_key.as_ref().and_then(|key| {
            match StripeClient::new(key, &config.stripe_api_base) {
                Ok(client) => {
                    tracing::info!(
                        api_base = %config.stripe_api_base,
                        "Stripe integration enabled"
                    );
                    Some(Arc::new(client))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build Stripe client");
                    None
                }
            }
        });

        if stripe.is_none() {
            tracing::warn!("Stripe not configured - payments will not be available");
        }

        if config.stripe_webhook_secret.is_none() {
            tracing::warn!(
                "STRIPE_WEBHOOK_SECRET not set - webhook signatures will not be checked"
            );
        }

        let ledger = CreditLedger::new(store.clone(), config.usage_policy);
        let webhooks =
            StripeEventProcessor::new(store.clone(), ledger.clone(), config.pricing.clone())
                .with_claim_lease(claim_lease(config.request_timeout_seconds));

        Self {
            store,
            config,
            stripe,
            ledger,
            webhooks,
        }
    }

    /// The Stripe client, or 503 when payments are not configured.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::ServiceUnavailable` if Stripe is not configured.
    pub fn stripe(&self) -> Result<&StripeClient, ApiError> {
        self.stripe
            .as_deref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Payments are not configured".into()))
    }
}

/// Claim lease for webhook deliveries: twice the request timeout, so the
/// timeout layer always drops an in-flight delivery before a retry may take
/// its journal row over.
fn claim_lease(request_timeout_seconds: u64) -> chrono::Duration {
    let seconds = i64::try_from(request_timeout_seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(2)
        .clamp(DEFAULT_CLAIM_LEASE_SECONDS, 86_400);
    chrono::Duration::seconds(seconds)
}
