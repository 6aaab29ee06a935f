//! Billing HTTP client implementation.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use cvmatch_core::{UsageDecision, UserId};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, ConsumeResponse, CreditAdditionResponse, DeductRequest,
    DeductResponse, RefundRequest, UserRequest,
};

/// Billing API client for internal services.
#[derive(Debug, Clone)]
pub struct BillingClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl BillingClient {
    /// Create a new billing client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the billing service (e.g., `"http://billing:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new billing client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Deduct credits for an operation.
    ///
    /// # Errors
    ///
    /// - `ClientError::InsufficientCredits` if the balance cannot cover it.
    /// - `ClientError::Conflict` if the balance changed concurrently.
    pub async fn deduct_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        operation_id: impl Into<String>,
    ) -> Result<DeductResponse, ClientError> {
        let request = DeductRequest {
            user_id: *user_id,
            amount,
            operation_id: operation_id.into(),
        };
        self.post("/v1/credits/deduct", &request).await
    }

    /// Return credits charged for a failed operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn refund_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        operation_id: impl Into<String>,
        reason: Option<String>,
    ) -> Result<CreditAdditionResponse, ClientError> {
        let request = RefundRequest {
            user_id: *user_id,
            amount,
            operation_id: operation_id.into(),
            reason,
        };
        self.post("/v1/credits/refund", &request).await
    }

    /// Ask whether the user may run an optimization now.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn check_usage(&self, user_id: &UserId) -> Result<UsageDecision, ClientError> {
        let request = UserRequest {
            user_id,
            operation_id: None,
        };
        self.post("/v1/usage/check", &request).await
    }

    /// Charge one optimization to the user.
    ///
    /// # Errors
    ///
    /// - `ClientError::UsageLimitReached` when nothing is left to pay with.
    pub async fn consume_optimization(
        &self,
        user_id: &UserId,
        operation_id: &str,
    ) -> Result<ConsumeResponse, ClientError> {
        let request = UserRequest {
            user_id,
            operation_id: Some(operation_id),
        };
        self.post("/v1/usage/consume", &request).await
    }

    /// Get a user's current balance (requires user JWT, not service API key).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_balance(&self, user_jwt: &str) -> Result<BalanceResponse, ClientError> {
        let url = format!("{}/v1/credits/balance", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("authorization", format!("Bearer {user_jwt}"))
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(url = %url, service = %self.service_name, "Billing request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        let Ok(api_error) = error_body else {
            return Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            });
        };

        let details = api_error.error.details.unwrap_or_default();
        let detail_i64 = |key: &str| details.get(key).and_then(serde_json::Value::as_i64);
        let message = api_error.error.message;

        // Map specific error codes to typed errors
        Err(match api_error.error.code.as_str() {
            "unauthorized" => ClientError::Unauthorized,
            "insufficient_credits" => ClientError::InsufficientCredits {
                balance: detail_i64("balance").unwrap_or(0),
                required: detail_i64("required").unwrap_or(0),
            },
            "usage_limit_reached" => ClientError::UsageLimitReached {
                upgrade_suggestion: details
                    .get("upgrade_suggestion")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
                message,
            },
            "conflict" => ClientError::Conflict { message },
            "not_found" if message.starts_with("Account not found") => {
                ClientError::AccountNotFound {
                    user_id: message.replace("Account not found: ", ""),
                }
            }
            code => ClientError::Api {
                code: code.to_string(),
                message,
                status: status.as_u16(),
            },
        })
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = BillingClient::new("http://localhost:8080/", "test-api-key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("resume-optimizer");
        let client = BillingClient::with_options("http://localhost:8080", "key", options).unwrap();
        assert_eq!(client.service_name, "resume-optimizer");
    }
}
