//! Common test utilities for CV-Match billing integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use cvmatch_core::UserId;
use cvmatch_service::auth::JwtClaims;
use cvmatch_service::stripe::sign_payload;
use cvmatch_service::{create_router, AppState, ServiceConfig};
use cvmatch_store::MemoryStore;

pub const JWT_SECRET: &str = "test-jwt-secret-with-at-least-32-characters";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for fixtures and failure switches.
    pub store: Arc<MemoryStore>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness over an empty in-memory store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness with a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            test_user_id: UserId::generate(),
        }
    }

    /// Authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        bearer_for(&self.test_user_id)
    }

    /// Authorization header for a different, fresh user.
    pub fn other_user_auth_header() -> String {
        bearer_for(&UserId::generate())
    }

    /// Sign a webhook body the way Stripe does, timestamped now.
    pub fn stripe_signature(payload: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        sign_payload(payload, WEBHOOK_SECRET, now).expect("Failed to sign payload")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with every credential set and Stripe unconfigured.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        listen_addr: "127.0.0.1:0".into(),
        jwt_secret: Some(JWT_SECRET.into()),
        service_api_key: Some(SERVICE_API_KEY.into()),
        admin_api_key: Some(ADMIN_API_KEY.into()),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        ..ServiceConfig::default()
    }
}

/// A valid Supabase-style bearer token for `user_id`.
pub fn bearer_for(user_id: &UserId) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: user_id.to_string(),
        aud: Some(serde_json::json!("authenticated")),
        exp: now + 3600,
        iat: now,
        email: Some("test@example.com".into()),
        role: Some("authenticated".into()),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to encode token");
    format!("Bearer {token}")
}
