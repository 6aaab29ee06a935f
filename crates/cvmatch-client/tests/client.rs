//! Billing client tests against a mocked service.

use cvmatch_client::{BillingClient, ClientError, ClientOptions};
use cvmatch_core::{UsageReason, UserId};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> BillingClient {
    BillingClient::with_options(
        server.uri(),
        "test-service-key",
        ClientOptions::with_service_name("resume-optimizer"),
    )
    .unwrap()
}

fn error_body(code: &str, message: &str, details: serde_json::Value) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message, "details": details } })
}

#[tokio::test]
async fn deduct_sends_service_credentials() {
    let server = MockServer::start().await;
    let user_id = UserId::generate();
    Mock::given(method("POST"))
        .and(path("/v1/credits/deduct"))
        .and(header("x-api-key", "test-service-key"))
        .and(header("x-service-name", "resume-optimizer"))
        .and(body_partial_json(json!({
            "user_id": user_id.to_string(),
            "amount": 1,
            "operation_id": "opt_1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "amount": 1,
            "balance_after": 2,
            "operation_id": "opt_1",
            "transaction_id": "01JAB3Z6V2W8K5N7Q9R1S3T5V7",
            "path": "atomic"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let deduction = client(&server)
        .deduct_credits(&user_id, 1, "opt_1")
        .await
        .unwrap();

    assert_eq!(deduction.balance_after, 2);
    assert_eq!(deduction.path, "atomic");
}

#[tokio::test]
async fn insufficient_credits_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/credits/deduct"))
        .respond_with(ResponseTemplate::new(402).set_body_json(error_body(
            "insufficient_credits",
            "insufficient credits: balance=3, required=5",
            json!({ "balance": 3, "required": 5 }),
        )))
        .mount(&server)
        .await;

    let err = client(&server)
        .deduct_credits(&UserId::generate(), 5, "opt_1")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::InsufficientCredits {
            balance: 3,
            required: 5
        }
    ));
}

#[tokio::test]
async fn conflict_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/credits/deduct"))
        .respond_with(ResponseTemplate::new(409).set_body_json(error_body(
            "conflict",
            "Balance changed concurrently, retry the request",
            serde_json::Value::Null,
        )))
        .mount(&server)
        .await;

    let err = client(&server)
        .deduct_credits(&UserId::generate(), 1, "opt_1")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Conflict { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn usage_decision_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/usage/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "can_optimize": true,
            "reason": "free_allowance",
            "credits_required": 0,
            "credits_remaining": 3,
            "free_optimizations_remaining": 1
        })))
        .mount(&server)
        .await;

    let decision = client(&server)
        .check_usage(&UserId::generate())
        .await
        .unwrap();

    assert!(decision.can_optimize);
    assert_eq!(decision.reason, UsageReason::FreeAllowance);
    assert!(decision.upgrade_suggestion.is_none());
}

#[tokio::test]
async fn usage_limit_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/usage/consume"))
        .respond_with(ResponseTemplate::new(402).set_body_json(error_body(
            "usage_limit_reached",
            "Monthly free optimizations used and no credits remaining",
            json!({
                "can_optimize": false,
                "reason": "limit_reached",
                "upgrade_suggestion": "Buy a credit pack"
            }),
        )))
        .mount(&server)
        .await;

    let err = client(&server)
        .consume_optimization(&UserId::generate(), "opt_9")
        .await
        .unwrap_err();

    match err {
        ClientError::UsageLimitReached {
            upgrade_suggestion, ..
        } => assert_eq!(upgrade_suggestion.as_deref(), Some("Buy a credit pack")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_errors_keep_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/credits/refund"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = client(&server)
        .refund_credits(&UserId::generate(), 1, "opt_1", None)
        .await
        .unwrap_err();

    match &err {
        ClientError::Api { status, code, .. } => {
            assert_eq!(*status, 503);
            assert_eq!(code, "unknown");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn balance_uses_user_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/credits/balance"))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "credits_remaining": 7,
            "total_credits": 18,
            "is_pro": false,
            "subscription_tier": "free"
        })))
        .mount(&server)
        .await;

    let balance = client(&server).get_balance("user-jwt").await.unwrap();

    assert_eq!(balance.credits_remaining, 7);
    assert_eq!(balance.total_credits, 18);
}
