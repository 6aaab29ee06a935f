//! Credit balance, deduction and transaction integration tests.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, ADMIN_API_KEY, SERVICE_API_KEY};
use serde_json::json;

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn new_account_starts_with_initial_credits() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credits_remaining"], 3);
    assert_eq!(body["total_credits"], 3);
    assert_eq!(body["is_pro"], false);
    assert_eq!(body["subscription_tier"], "free");
}

#[tokio::test]
async fn get_account_returns_user() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], harness.test_user_id.to_string());
}

#[tokio::test]
async fn get_balance_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credits/balance").await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn get_balance_with_bad_token_fails() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", "Bearer not-a-jwt".to_string())
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Deduction
// ============================================================================

#[tokio::test]
async fn deduct_reduces_balance_and_logs_transaction() {
    let harness = TestHarness::new();
    let user_id = harness.test_user_id.to_string();

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .add_header("x-service-name", "resume-optimizer".to_string())
        .json(&json!({ "user_id": user_id, "amount": 2, "operation_id": "opt_1" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance_after"], 1);
    assert_eq!(body["path"], "atomic");
    assert!(body["transaction_id"].is_string());

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let txs = body["transactions"].as_array().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0]["amount"], -2);
    assert_eq!(txs[0]["transaction_type"], "deduction");
    assert_eq!(txs[0]["source"], "resume-optimizer");
    assert_eq!(txs[0]["operation_id"], "opt_1");
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn deduct_more_than_balance_is_payment_required() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount": 5,
            "operation_id": "opt_1"
        }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["balance"], 3);
    assert_eq!(body["error"]["details"]["required"], 5);

    let balance: serde_json::Value = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance["credits_remaining"], 3);
}

#[tokio::test]
async fn deduct_rejects_non_positive_amount() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount": 0,
            "operation_id": "opt_1"
        }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn deduct_requires_service_key() {
    let harness = TestHarness::new();
    let body = json!({
        "user_id": harness.test_user_id.to_string(),
        "operation_id": "opt_1"
    });

    harness
        .server
        .post("/v1/credits/deduct")
        .json(&body)
        .await
        .assert_status_unauthorized();

    harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", "wrong-key".to_string())
        .json(&body)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn fallback_path_is_used_without_database_function() {
    let harness = TestHarness::new();
    harness.store.set_procedure_available(false);

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation_id": "opt_1"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["path"], "optimistic");
    assert_eq!(body["balance_after"], 2);
}

#[tokio::test]
async fn repeated_fallback_conflicts_are_reported_as_conflict() {
    let harness = TestHarness::new();
    harness.store.set_procedure_available(false);
    harness.store.inject_cas_conflicts(2);

    let response = harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation_id": "opt_1"
        }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn concurrent_deductions_never_overdraw() {
    let harness = TestHarness::new();
    let user_id = harness.test_user_id.to_string();

    let requests = (0..20).map(|i| {
        let server = &harness.server;
        let body = json!({ "user_id": user_id, "operation_id": format!("opt_{i}") });
        async move {
            server
                .post("/v1/credits/deduct")
                .add_header("x-api-key", SERVICE_API_KEY.to_string())
                .json(&body)
                .await
                .status_code()
        }
    });
    let statuses = futures::future::join_all(requests).await;

    let applied = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let refused = statuses
        .iter()
        .filter(|s| **s == StatusCode::PAYMENT_REQUIRED)
        .count();
    assert_eq!(applied, 3);
    assert_eq!(refused, 17);

    let balance: serde_json::Value = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance["credits_remaining"], 0);
}

// ============================================================================
// Refunds and admin grants
// ============================================================================

#[tokio::test]
async fn refund_restores_deducted_credits() {
    let harness = TestHarness::new();
    let user_id = harness.test_user_id.to_string();

    harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({ "user_id": user_id, "amount": 2, "operation_id": "opt_1" }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/credits/refund")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({
            "user_id": user_id,
            "amount": 2,
            "operation_id": "opt_1",
            "reason": "model timeout"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance_after"], 3);

    let balance: serde_json::Value = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance["total_credits"], 3);
}

#[tokio::test]
async fn admin_can_grant_bonus_credits() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/add")
        .add_header("x-admin-key", ADMIN_API_KEY.to_string())
        .add_header("x-admin-id", "support-ana".to_string())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount": 10,
            "reason": "Launch promotion"
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance_after"], 13);

    let balance: serde_json::Value = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(balance["total_credits"], 13);
}

#[tokio::test]
async fn add_credits_requires_admin_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/credits/add")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({ "user_id": harness.test_user_id.to_string(), "amount": 10 }))
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn transactions_are_paged_newest_first() {
    let harness = TestHarness::new();
    let user_id = harness.test_user_id.to_string();

    for i in 0..3 {
        harness
            .server
            .post("/v1/credits/deduct")
            .add_header("x-api-key", SERVICE_API_KEY.to_string())
            .json(&json!({ "user_id": user_id, "operation_id": format!("opt_{i}") }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_query_param("limit", 2)
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let txs = body["transactions"].as_array().unwrap();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0]["operation_id"], "opt_2");
    assert_eq!(txs[1]["operation_id"], "opt_1");
    assert_eq!(body["has_more"], true);
}

#[tokio::test]
async fn transactions_are_isolated_per_user() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/credits/deduct")
        .add_header("x-api-key", SERVICE_API_KEY.to_string())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation_id": "opt_1"
        }))
        .await
        .assert_status_ok();

    let body: serde_json::Value = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", TestHarness::other_user_auth_header())
        .await
        .json();
    assert!(body["transactions"].as_array().unwrap().is_empty());
}
