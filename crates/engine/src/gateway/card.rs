//! HTTP client for the card processor.
//!
//! Single-call capture: the processor either settles the charge and returns
//! a transaction id plus authorization code, or answers 402 with a
//! machine-readable decline code.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;

use super::{CardChargeRequest, CardGateway, CardGatewayError, CardReceipt};

/// Card processor connection settings.
#[derive(Debug, Clone)]
pub struct CardGatewayConfig {
    /// API origin, e.g. `https://api.cardprocessor.example`.
    pub base_url: String,
    pub api_key: SecretString,
}

/// Card processor API client.
#[derive(Clone)]
pub struct CardClient {
    client: reqwest::Client,
    base_url: String,
}

impl CardClient {
    /// Create a new card processor client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &CardGatewayConfig) -> Result<Self, CardGatewayError> {
        let mut headers = HeaderMap::new();

        let auth_value = format!("Bearer {}", config.api_key.expose_secret());
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&auth_value)
                .map_err(|e| CardGatewayError::Parse(format!("Invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl CardGateway for CardClient {
    #[instrument(skip(self, request), fields(order_ref = %request.order_ref))]
    async fn capture(&self, request: &CardChargeRequest) -> Result<CardReceipt, CardGatewayError> {
        let url = format!("{}/v1/charges", self.base_url);

        let body = serde_json::json!({
            "amount": request.amount.amount,
            "currency": request.amount.currency.code(),
            "reference": request.order_ref.to_string(),
            "card_token": request.instrument_token,
            "customer": {
                "name": request.customer_name,
                "email": request.customer_email.as_str(),
            },
            "billing_address": request.billing_address,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if status == StatusCode::PAYMENT_REQUIRED {
            let decline: DeclineResponse = response
                .json()
                .await
                .map_err(|e| CardGatewayError::Parse(e.to_string()))?;
            return Err(CardGatewayError::Declined {
                reason_code: decline.decline_code,
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CardGatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| CardGatewayError::Parse(e.to_string()))?;

        Ok(CardReceipt {
            transaction_id: charge.transaction_id,
            auth_code: charge.auth_code,
        })
    }
}

/// Successful capture payload.
#[derive(Debug, Deserialize)]
struct ChargeResponse {
    transaction_id: String,
    auth_code: String,
}

/// 402 payload carrying the decline reason.
#[derive(Debug, Deserialize)]
struct DeclineResponse {
    decline_code: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let client = CardClient::new(&CardGatewayConfig {
            base_url: "https://api.cardprocessor.example/".to_owned(),
            api_key: SecretString::from("sk_test_123"),
        })
        .unwrap();
        assert_eq!(client.base_url, "https://api.cardprocessor.example");
    }

    #[test]
    fn test_decline_payload_parses() {
        let decline: DeclineResponse =
            serde_json::from_str(r#"{"decline_code":"insufficient_funds","message":"NSF"}"#)
                .unwrap();
        assert_eq!(decline.decline_code, "insufficient_funds");
    }
}
