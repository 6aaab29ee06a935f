//! Stripe API client implementation.

use std::time::Duration;

use reqwest::Client;

use cvmatch_core::{PackOffer, UserId};

use super::types::{CheckoutSession, PaymentIntent, StripeErrorResponse};

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No `v1` signature matched the payload.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// The `Stripe-Signature` header could not be parsed.
    #[error("Malformed signature header: {0}")]
    MalformedSignature(String),

    /// The signed timestamp is too old (or too far in the future).
    #[error("Webhook timestamp {timestamp} outside tolerance of {tolerance_seconds}s")]
    TimestampOutsideTolerance {
        /// Timestamp from the header.
        timestamp: i64,
        /// Allowed skew.
        tolerance_seconds: i64,
    },
}

/// What a Checkout session sells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutItem {
    /// A one-time credit pack.
    CreditPack(PackOffer),
    /// The monthly Pro plan.
    ProSubscription {
        /// Monthly price in centavos.
        monthly_price_cents: i64,
    },
}

/// Parameters for a Checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Buyer.
    pub user_id: UserId,
    /// Prefills the Checkout email field.
    pub customer_email: Option<String>,
    /// What is being bought.
    pub item: CheckoutItem,
    /// Lowercase ISO currency.
    pub currency: String,
    /// Redirect after payment.
    pub success_url: String,
    /// Redirect on cancel.
    pub cancel_url: String,
}

impl CheckoutRequest {
    fn form_params(&self) -> Vec<(&'static str, String)> {
        let user_id = self.user_id.to_string();
        let mut params = vec![
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("client_reference_id", user_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", self.currency.clone()),
            ("metadata[user_id]", user_id.clone()),
        ];

        match &self.item {
            CheckoutItem::CreditPack(offer) => params.extend([
                ("mode", "payment".to_string()),
                (
                    "line_items[0][price_data][product_data][name]",
                    format!("CV-Match {} pack", capitalize(offer.pack.as_str())),
                ),
                (
                    "line_items[0][price_data][product_data][description]",
                    format!("{} resume optimization credits", offer.credits),
                ),
                (
                    "line_items[0][price_data][unit_amount]",
                    offer.price_cents.to_string(),
                ),
                ("metadata[pack]", offer.pack.as_str().to_string()),
                ("metadata[credits]", offer.credits.to_string()),
            ]),
            CheckoutItem::ProSubscription {
                monthly_price_cents,
            } => params.extend([
                ("mode", "subscription".to_string()),
                (
                    "line_items[0][price_data][product_data][name]",
                    "CV-Match Pro".to_string(),
                ),
                (
                    "line_items[0][price_data][recurring][interval]",
                    "month".to_string(),
                ),
                (
                    "line_items[0][price_data][unit_amount]",
                    monthly_price_cents.to_string(),
                ),
                ("metadata[tier]", "pro".to_string()),
                ("subscription_data[metadata][user_id]", user_id),
                ("subscription_data[metadata][tier]", "pro".to_string()),
            ]),
        }

        if let Some(email) = &self.customer_email {
            params.push(("customer_email", email.clone()));
        }
        params
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Create a new Stripe client against `base_url` (normally
    /// `https://api.stripe.com`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a Checkout session for a credit pack or the Pro plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, StripeError> {
        tracing::debug!(
            user_id = %request.user_id,
            item = ?request.item,
            "Creating Stripe checkout session"
        );

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&request.form_params())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a `PaymentIntent` for a credit pack.
    ///
    /// The intent carries `user_id` and `credits` in its metadata so the
    /// `payment_intent.succeeded` webhook can grant the credits.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Stripe rejects it.
    pub async fn create_payment_intent(
        &self,
        user_id: &UserId,
        offer: &PackOffer,
        currency: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let params = [
            ("amount", offer.price_cents.to_string()),
            ("currency", currency.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            (
                "description",
                format!("CV-Match {} credits", offer.credits),
            ),
            ("metadata[user_id]", user_id.to_string()),
            ("metadata[pack]", offer.pack.as_str().to_string()),
            ("metadata[credits]", offer.credits.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let error_body: Result<StripeErrorResponse, _> = response.json().await;

        match error_body {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use cvmatch_core::{CreditPack, PricingConfig};
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn starter_offer() -> PackOffer {
        PricingConfig::default()
            .offer(CreditPack::Starter)
            .cloned()
            .unwrap()
    }

    fn checkout(item: CheckoutItem) -> CheckoutRequest {
        CheckoutRequest {
            user_id: UserId::generate(),
            customer_email: None,
            item,
            currency: "brl".into(),
            success_url: "http://localhost:3000/success".into(),
            cancel_url: "http://localhost:3000/cancel".into(),
        }
    }

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn pack_checkout_carries_credit_metadata() {
        let params = checkout(CheckoutItem::CreditPack(starter_offer())).form_params();

        assert_eq!(param(&params, "mode"), Some("payment"));
        assert_eq!(param(&params, "metadata[credits]"), Some("5"));
        assert_eq!(param(&params, "metadata[pack]"), Some("starter"));
        assert_eq!(
            param(&params, "line_items[0][price_data][unit_amount]"),
            Some("2990")
        );
        assert_eq!(
            param(&params, "line_items[0][price_data][product_data][name]"),
            Some("CV-Match Starter pack")
        );
    }

    #[test]
    fn pro_checkout_is_monthly_subscription() {
        let request = checkout(CheckoutItem::ProSubscription {
            monthly_price_cents: 4990,
        });
        let params = request.form_params();

        assert_eq!(param(&params, "mode"), Some("subscription"));
        assert_eq!(
            param(&params, "line_items[0][price_data][recurring][interval]"),
            Some("month")
        );
        assert_eq!(
            param(&params, "subscription_data[metadata][user_id]"),
            Some(request.user_id.to_string().as_str())
        );
        assert!(param(&params, "metadata[credits]").is_none());
    }

    #[tokio::test]
    async fn checkout_session_is_created() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header_exists("authorization"))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cs_test_123",
                "url": "https://checkout.stripe.com/c/pay/cs_test_123",
                "mode": "payment",
                "payment_status": "unpaid"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        let session = client
            .create_checkout_session(&checkout(CheckoutItem::CreditPack(starter_offer())))
            .await
            .unwrap();

        assert_eq!(session.id, "cs_test_123");
        assert!(session.url.unwrap().contains("cs_test_123"));
    }

    #[tokio::test]
    async fn api_errors_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {
                    "type": "card_error",
                    "message": "Your card was declined.",
                    "code": "card_declined"
                }
            })))
            .mount(&server)
            .await;

        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        let err = client
            .create_payment_intent(&UserId::generate(), &starter_offer(), "brl")
            .await
            .unwrap_err();

        match err {
            StripeError::Api {
                error_type, code, ..
            } => {
                assert_eq!(error_type, "card_error");
                assert_eq!(code.as_deref(), Some("card_declined"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_json_errors_report_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = StripeClient::new("sk_test_xxx", server.uri()).unwrap();
        let err = client
            .create_payment_intent(&UserId::generate(), &starter_offer(), "brl")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("503"));
    }
}
