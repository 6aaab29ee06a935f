//! Pricing catalogue and Stripe payment handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use cvmatch_core::{format_brl, CreditPack, PackOffer};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::{CheckoutItem, CheckoutRequest};

/// A credit pack as shown to customers.
#[derive(Debug, Serialize)]
pub struct PackResponse {
    /// Pack id (`starter`, `professional`, `business`).
    pub pack: CreditPack,
    /// Credits granted.
    pub credits: i64,
    /// Price in centavos.
    pub price_cents: i64,
    /// Price formatted as `R$ 29,90`.
    pub price_formatted: String,
}

impl From<&PackOffer> for PackResponse {
    fn from(offer: &PackOffer) -> Self {
        Self {
            pack: offer.pack,
            credits: offer.credits,
            price_cents: offer.price_cents,
            price_formatted: format_brl(offer.price_cents),
        }
    }
}

/// The Pro subscription as shown to customers.
#[derive(Debug, Serialize)]
pub struct ProPlanResponse {
    /// Monthly price in centavos.
    pub monthly_price_cents: i64,
    /// Price formatted as `R$ 49,90`.
    pub price_formatted: String,
    /// Always `true`.
    pub unlimited_optimizations: bool,
}

/// Catalogue response.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    /// Currency code.
    pub currency: String,
    /// Credit packs.
    pub packs: Vec<PackResponse>,
    /// Pro plan.
    pub pro: ProPlanResponse,
    /// Free optimizations per month on the free tier.
    pub free_monthly_optimizations: u32,
}

/// List prices.
pub async fn catalog(State(state): State<Arc<AppState>>) -> Json<CatalogResponse> {
    let pricing = &state.config.pricing;

    Json(CatalogResponse {
        currency: pricing.currency.clone(),
        packs: pricing.packs.iter().map(PackResponse::from).collect(),
        pro: ProPlanResponse {
            monthly_price_cents: pricing.pro_monthly_price_cents,
            price_formatted: format_brl(pricing.pro_monthly_price_cents),
            unlimited_optimizations: true,
        },
        free_monthly_optimizations: state.ledger.policy().free_monthly_optimizations,
    })
}

/// Checkout request: a credit pack or the Pro plan.
#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    /// Credit pack to buy.
    #[serde(default)]
    pub pack: Option<CreditPack>,
    /// Plan to subscribe to (`pro`).
    #[serde(default)]
    pub plan: Option<String>,
}

/// Checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Stripe Checkout URL.
    pub checkout_url: String,
    /// Session ID for tracking.
    pub session_id: String,
}

/// Start a Stripe Checkout session.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let stripe = state.stripe()?;
    let pricing = &state.config.pricing;

    let item = match (body.pack, body.plan.as_deref()) {
        (Some(pack), None) => CheckoutItem::CreditPack(offer(&state, pack)?.clone()),
        (None, Some("pro")) => CheckoutItem::ProSubscription {
            monthly_price_cents: pricing.pro_monthly_price_cents,
        },
        (None, Some(other)) => {
            return Err(ApiError::BadRequest(format!("Unknown plan: {other}")));
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Provide exactly one of `pack` or `plan`".into(),
            ));
        }
    };

    state.ledger.account(&auth.user_id).await?;

    let frontend = state.config.frontend_url.trim_end_matches('/');
    let request = CheckoutRequest {
        user_id: auth.user_id,
        customer_email: auth.email,
        item,
        currency: pricing.currency.clone(),
        success_url: format!("{frontend}/billing/success?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{frontend}/billing/cancel"),
    };

    tracing::info!(user_id = %auth.user_id, item = ?request.item, "Initiating checkout");

    let session = stripe.create_checkout_session(&request).await?;
    let checkout_url = session
        .url
        .ok_or_else(|| ApiError::ExternalService("Stripe returned no checkout URL".into()))?;

    Ok(Json(CheckoutResponse {
        checkout_url,
        session_id: session.id,
    }))
}

/// Payment intent request.
#[derive(Debug, Deserialize)]
pub struct IntentBody {
    /// Credit pack to buy.
    pub pack: CreditPack,
}

/// Payment intent response.
#[derive(Debug, Serialize)]
pub struct IntentResponse {
    /// Intent ID.
    pub payment_intent_id: String,
    /// Secret the browser confirms the payment with.
    pub client_secret: Option<String>,
    /// Amount in centavos.
    pub amount: i64,
    /// Currency.
    pub currency: String,
}

/// Create a Stripe `PaymentIntent` for a credit pack.
pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<IntentBody>,
) -> Result<Json<IntentResponse>, ApiError> {
    let stripe = state.stripe()?;
    let offer = offer(&state, body.pack)?;

    state.ledger.account(&auth.user_id).await?;

    let intent = stripe
        .create_payment_intent(&auth.user_id, offer, &state.config.pricing.currency)
        .await?;

    Ok(Json(IntentResponse {
        payment_intent_id: intent.id,
        client_secret: intent.client_secret,
        amount: intent.amount,
        currency: intent.currency,
    }))
}

fn offer(state: &AppState, pack: CreditPack) -> Result<&PackOffer, ApiError> {
    state
        .config
        .pricing
        .offer(pack)
        .ok_or_else(|| ApiError::BadRequest(format!("Pack {pack} is not on sale")))
}
