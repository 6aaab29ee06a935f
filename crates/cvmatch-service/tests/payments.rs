//! Pricing catalogue and Stripe payment integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stripe_harness(server: &MockServer) -> TestHarness {
    let config = cvmatch_service::ServiceConfig {
        stripe_api_key: Some("sk_test_xxx".into()),
        stripe_api_base: server.uri(),
        ..common::test_config()
    };
    TestHarness::with_config(config)
}

#[tokio::test]
async fn catalog_lists_packs_in_brl() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/payments/catalog").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["currency"], "brl");
    let packs = body["packs"].as_array().unwrap();
    assert_eq!(packs.len(), 3);
    assert_eq!(packs[0]["pack"], "starter");
    assert_eq!(packs[0]["credits"], 5);
    assert_eq!(packs[0]["price_formatted"], "R$ 29,90");
    assert_eq!(packs[2]["price_cents"], 12990);
    assert_eq!(body["pro"]["monthly_price_cents"], 4990);
    assert_eq!(body["free_monthly_optimizations"], 1);
}

#[tokio::test]
async fn checkout_without_stripe_is_unavailable() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/payments/checkout")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "pack": "starter" }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn pack_checkout_returns_session_url() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains("metadata%5Bcredits%5D=15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_abc",
            "url": "https://checkout.stripe.com/c/pay/cs_test_abc",
            "mode": "payment"
        })))
        .expect(1)
        .mount(&stripe)
        .await;
    let harness = stripe_harness(&stripe);

    let response = harness
        .server
        .post("/v1/payments/checkout")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "pack": "professional" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["session_id"], "cs_test_abc");
    assert_eq!(body["checkout_url"], "https://checkout.stripe.com/c/pay/cs_test_abc");
}

#[tokio::test]
async fn pro_checkout_is_a_subscription() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(body_string_contains("mode=subscription"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_pro",
            "url": "https://checkout.stripe.com/c/pay/cs_test_pro",
            "mode": "subscription"
        })))
        .expect(1)
        .mount(&stripe)
        .await;
    let harness = stripe_harness(&stripe);

    harness
        .server
        .post("/v1/payments/checkout")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "plan": "pro" }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn checkout_needs_exactly_one_item() {
    let stripe = MockServer::start().await;
    let harness = stripe_harness(&stripe);

    let bodies = [
        json!({}),
        json!({ "pack": "starter", "plan": "pro" }),
        json!({ "plan": "gold" }),
    ];
    for body in bodies {
        harness
            .server
            .post("/v1/payments/checkout")
            .add_header("authorization", harness.user_auth_header())
            .json(&body)
            .await
            .assert_status_bad_request();
    }
}

#[tokio::test]
async fn stripe_errors_surface_as_bad_gateway() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "type": "invalid_request_error", "message": "Invalid currency" }
        })))
        .mount(&stripe)
        .await;
    let harness = stripe_harness(&stripe);

    let response = harness
        .server
        .post("/v1/payments/intent")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "pack": "starter" }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "external_service_error");
}

#[tokio::test]
async fn payment_intent_returns_client_secret() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(body_string_contains("amount=2990"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "amount": 2990,
            "currency": "brl",
            "status": "requires_payment_method",
            "client_secret": "pi_123_secret_abc"
        })))
        .mount(&stripe)
        .await;
    let harness = stripe_harness(&stripe);

    let response = harness
        .server
        .post("/v1/payments/intent")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "pack": "starter" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["payment_intent_id"], "pi_123");
    assert_eq!(body["client_secret"], "pi_123_secret_abc");
}
