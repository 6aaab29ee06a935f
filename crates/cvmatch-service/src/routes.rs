//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, credits, health, payments, usage, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for the service-to-service endpoints.
/// The optimization pipeline calls these once per resume.
const SERVICE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/payments/catalog` - Credit packs and plan prices
///
/// ## User (Supabase JWT auth)
/// - `GET /v1/accounts/me` - Current user's account
/// - `GET /v1/credits/balance` - Current balance
/// - `GET /v1/credits/transactions` - Transaction history
/// - `GET /v1/usage` - This month's usage
/// - `POST /v1/payments/checkout` - Stripe Checkout for a pack or Pro
/// - `POST /v1/payments/intent` - Stripe `PaymentIntent` for a pack
///
/// ## Service (API key auth, rate-limited)
/// - `POST /v1/credits/deduct` - Deduct credits
/// - `POST /v1/credits/refund` - Refund credits
/// - `POST /v1/usage/check` - Usage limit decision
/// - `POST /v1/usage/consume` - Charge one optimization
///
/// ## Admin (admin key auth)
/// - `POST /v1/credits/add` - Grant bonus credits
/// - `GET /v1/webhooks/events/:id` - Inspect a journaled webhook
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let service_routes = Router::new()
        .route("/credits/deduct", post(credits::deduct_credits))
        .route("/credits/refund", post(credits::refund_credits))
        .route("/usage/check", post(usage::check_usage))
        .route("/usage/consume", post(usage::consume_optimization))
        .layer(ConcurrencyLimitLayer::new(SERVICE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts/me", get(accounts::get_account))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/add", post(credits::add_credits))
        // Usage
        .route("/usage", get(usage::get_usage))
        // Payments
        .route("/payments/catalog", get(payments::catalog))
        .route("/payments/checkout", post(payments::create_checkout))
        .route("/payments/intent", post(payments::create_intent))
        // Webhook journal
        .route("/webhooks/events/:id", get(webhooks::get_webhook_event))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Service routes (with their own concurrency limit)
        .merge(service_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by Stripe)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
