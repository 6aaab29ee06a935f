//! Stripe API types.

use serde::{Deserialize, Serialize};

/// Stripe Checkout session object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Session ID.
    pub id: String,
    /// Checkout URL to redirect the user to.
    #[serde(default)]
    pub url: Option<String>,
    /// `payment` or `subscription`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Payment status (`paid`, `unpaid`, `no_payment_required`).
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Total amount in centavos.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Client reference ID (our `user_id`).
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Stripe `PaymentIntent` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Payment intent ID.
    pub id: String,
    /// Amount in centavos.
    #[serde(default)]
    pub amount: i64,
    /// Currency (e.g., "brl").
    #[serde(default)]
    pub currency: String,
    /// Status (succeeded, `requires_payment_method`, ...).
    #[serde(default)]
    pub status: String,
    /// Secret handed to the browser to confirm the payment.
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Stripe error response.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    /// Error details.
    pub error: StripeErrorDetail,
}

/// Stripe error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorDetail {
    /// Error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error code.
    #[serde(default)]
    pub code: Option<String>,
}

/// A webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    /// Event ID (`evt_...`).
    pub id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: StripeEventData,
    /// Creation time (Unix seconds).
    #[serde(default)]
    pub created: i64,
}

/// Stripe event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    /// The object the event is about.
    pub object: serde_json::Value,
}
