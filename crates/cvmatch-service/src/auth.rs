//! Authentication extractors.
//!
//! - `AuthUser` - end users, via a Supabase-issued HS256 JWT
//! - `ServiceAuth` - service-to-service calls, via `X-API-Key`
//! - `AdminAuth` - privileged endpoints, via `X-Admin-Key`

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use cvmatch_core::UserId;

use crate::crypto::constant_time_eq;
use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated user extracted from a Supabase JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user ID (`sub` claim).
    pub user_id: UserId,
    /// Email claim, when present.
    pub email: Option<String>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let Some(secret) = state.config.jwt_secret.as_deref() else {
            tracing::warn!("SUPABASE_JWT_SECRET not configured - rejecting user request");
            return Err(ApiError::Unauthorized);
        };

        let claims = validate_jwt(token, secret, &state.config.jwt_audience)?;

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(Self {
            user_id,
            email: claims.email,
        })
    }
}

/// Service authentication via API key.
///
/// Used by the optimization pipeline and other internal callers.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The calling service, from `X-Service-Name`.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header(parts, "x-api-key").ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .service_api_key
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(api_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let service_name = header(parts, "x-service-name")
            .unwrap_or("unknown")
            .to_string();

        Ok(Self { service_name })
    }
}

/// Admin authentication.
///
/// Requires `X-Admin-Key` to match the configured admin key.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let admin_key = header(parts, "x-admin-key").ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .admin_api_key
            .as_deref()
            .ok_or(ApiError::Unauthorized)?;

        if !constant_time_eq(admin_key, expected_key) {
            return Err(ApiError::Unauthorized);
        }

        let admin_id = header(parts, "x-admin-id")
            .unwrap_or("admin")
            .to_string();

        tracing::info!(admin_id = %admin_id, "Admin authenticated");

        Ok(Self { admin_id })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Supabase access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user UUID).
    pub sub: String,
    /// Audience (`authenticated` for signed-in users).
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Expiration time.
    pub exp: i64,
    /// Issued at.
    #[serde(default)]
    pub iat: i64,
    /// User email.
    #[serde(default)]
    pub email: Option<String>,
    /// Postgres role the token maps to.
    #[serde(default)]
    pub role: Option<String>,
}

/// Validate an HS256 token and return its claims.
///
/// # Errors
///
/// Returns `ApiError::Unauthorized` if the signature, expiry or audience
/// check fails.
pub fn validate_jwt(token: &str, secret: &str, audience: &str) -> Result<JwtClaims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);

    decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation failed");
        ApiError::Unauthorized
    })
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    const SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters";

    fn token(sub: &str, aud: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: sub.to_string(),
            aud: Some(serde_json::json!(aud)),
            exp: now + exp_offset,
            iat: now,
            email: Some("ana@example.com".into()),
            role: Some("authenticated".into()),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_claims() {
        let user_id = UserId::generate().to_string();
        let claims = validate_jwt(&token(&user_id, "authenticated", 3600), SECRET, "authenticated")
            .unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let tok = token("abc", "anon", 3600);
        assert!(validate_jwt(&tok, SECRET, "authenticated").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let tok = token("abc", "authenticated", -3600);
        assert!(validate_jwt(&tok, SECRET, "authenticated").is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let tok = token("abc", "authenticated", 3600);
        assert!(validate_jwt(&tok, "another-secret", "authenticated").is_err());
    }
}
