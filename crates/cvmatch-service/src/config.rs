//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use cvmatch_core::{
    PricingConfig, UsagePolicy, DEFAULT_FREE_MONTHLY_OPTIMIZATIONS, DEFAULT_INITIAL_CREDITS,
    OPTIMIZATION_CREDIT_COST,
};

/// Default Stripe API origin.
pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Default webhook timestamp tolerance (seconds).
pub const DEFAULT_WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// `PostgreSQL` connection URL. Without one the service runs on the
    /// in-memory store.
    pub database_url: Option<String>,

    /// Maximum pooled database connections (default: 10).
    pub database_max_connections: u32,

    /// Supabase JWT signing secret (HS256).
    pub jwt_secret: Option<String>,

    /// Expected JWT audience (default: "authenticated").
    pub jwt_audience: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API origin, overridable for tests.
    pub stripe_api_base: String,

    /// Maximum age of a signed webhook timestamp, in seconds.
    pub webhook_tolerance_seconds: i64,

    /// Frontend URL for checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Free allowance, optimization cost and initial credits.
    pub usage_policy: UsagePolicy,

    /// Pricing configuration.
    pub pricing: PricingConfig,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        // Try to load Stripe secrets from file first, then fall back to env vars
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            jwt_secret: non_empty_var("SUPABASE_JWT_SECRET"),
            jwt_audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "authenticated".into()),
            service_api_key: non_empty_var("SERVICE_API_KEY"),
            admin_api_key: non_empty_var("ADMIN_API_KEY"),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| STRIPE_API_BASE.into()),
            webhook_tolerance_seconds: env_or(
                "WEBHOOK_TOLERANCE_SECONDS",
                DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            ),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", 1024 * 1024), // 1MB
            request_timeout_seconds: env_or("REQUEST_TIMEOUT_SECONDS", 30),
            usage_policy: UsagePolicy {
                free_monthly_optimizations: env_or(
                    "FREE_MONTHLY_OPTIMIZATIONS",
                    DEFAULT_FREE_MONTHLY_OPTIMIZATIONS,
                ),
                optimization_cost: OPTIMIZATION_CREDIT_COST,
                initial_credits: env_or("INITIAL_CREDITS", DEFAULT_INITIAL_CREDITS),
            },
            pricing: PricingConfig::default(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    // Fall back to environment variables
    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        non_empty_var("STRIPE_API_KEY"),
        non_empty_var("STRIPE_WEBHOOK_SECRET"),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            jwt_secret: None,
            jwt_audience: "authenticated".into(),
            service_api_key: None,
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: STRIPE_API_BASE.into(),
            webhook_tolerance_seconds: DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            usage_policy: UsagePolicy::default(),
            pricing: PricingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_free_tier_policy() {
        let config = ServiceConfig::default();
        assert_eq!(config.usage_policy.free_monthly_optimizations, 1);
        assert_eq!(config.usage_policy.initial_credits, 3);
        assert_eq!(config.webhook_tolerance_seconds, 300);
        assert_eq!(config.jwt_audience, "authenticated");
    }

    #[test]
    fn secrets_file_missing_is_not_found() {
        let err = load_secrets_file::<StripeSecrets>("does/not/exist.json").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
