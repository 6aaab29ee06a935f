//! Usage limit integration tests.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, SERVICE_API_KEY};
use cvmatch_core::SubscriptionTier;
use cvmatch_store::Store;
use serde_json::json;

async fn consume(harness: &TestHarness, operation_id: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/v1/usage/consume")
        .add_header("x-api-key", SERVICE_API_KEY)
        .add_header("x-service-name", "resume-optimizer")
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation_id": operation_id
        }))
        .await
}

async fn check(harness: &TestHarness) -> serde_json::Value {
    let response = harness
        .server
        .post("/v1/usage/check")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "user_id": harness.test_user_id.to_string() }))
        .await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn new_user_has_free_allowance() {
    let harness = TestHarness::new();

    let decision = check(&harness).await;

    assert_eq!(decision["can_optimize"], true);
    assert_eq!(decision["reason"], "free_allowance");
    assert_eq!(decision["free_optimizations_remaining"], 1);
    assert_eq!(decision["credits_required"], 0);
}

#[tokio::test]
async fn allowance_then_credits_then_limit() {
    let harness = TestHarness::new();

    let response = consume(&harness, "opt_1").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["reason"], "free_allowance");
    assert_eq!(body["credits_charged"], 0);

    let decision = check(&harness).await;
    assert_eq!(decision["reason"], "credits");
    assert_eq!(decision["credits_required"], 1);

    for i in 0..3 {
        let response = consume(&harness, &format!("opt_paid_{i}")).await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["reason"], "credits");
        assert_eq!(body["credits_remaining"], 2 - i);
    }

    let decision = check(&harness).await;
    assert_eq!(decision["can_optimize"], false);
    assert_eq!(decision["reason"], "limit_reached");
    assert!(decision["upgrade_suggestion"].is_string());

    let response = consume(&harness, "opt_denied").await;
    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "usage_limit_reached");
    assert_eq!(body["error"]["details"]["can_optimize"], false);
}

#[tokio::test]
async fn pro_accounts_are_unlimited() {
    let harness = TestHarness::new();
    let user_id = harness.test_user_id;
    harness.store.get_or_create_account(&user_id, 3).await.unwrap();
    harness.store.set_balance(&user_id, 0).await.unwrap();
    harness
        .store
        .set_subscription(&user_id, SubscriptionTier::Pro)
        .await
        .unwrap();

    for i in 0..5 {
        let response = consume(&harness, &format!("opt_{i}")).await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["reason"], "pro_unlimited");
    }

    let decision = check(&harness).await;
    assert_eq!(decision["can_optimize"], true);
    assert_eq!(decision["reason"], "pro_unlimited");
}

#[tokio::test]
async fn user_usage_summary_counts_month() {
    let harness = TestHarness::new();
    consume(&harness, "opt_1").await.assert_status_ok();
    consume(&harness, "opt_2").await.assert_status_ok();

    let response = harness
        .server
        .get("/v1/usage")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["free_optimizations_used"], 1);
    assert_eq!(body["free_optimizations_limit"], 1);
    assert_eq!(body["paid_optimizations_used"], 1);
    assert_eq!(body["credits_remaining"], 2);
    assert_eq!(body["decision"]["reason"], "credits");
    assert_eq!(body["month"].as_str().unwrap().len(), 7);
}

#[tokio::test]
async fn usage_endpoints_require_service_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/usage/check")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "user_id": harness.test_user_id.to_string() }))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn invalid_user_id_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/usage/check")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "user_id": "not-a-uuid" }))
        .await;

    assert!(response.status_code().is_client_error());
}
