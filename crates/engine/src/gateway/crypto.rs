//! HTTP client for the crypto payment processor.
//!
//! Flow: quote the conversion, open a hosted session against the quote,
//! then poll session status. Amounts travel as decimal strings on the wire.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;

use super::{
    CryptoGateway, CryptoGatewayError, CryptoPaymentStatus, CryptoQuote, CryptoSession,
    SessionRequest,
};

/// Crypto processor connection settings.
#[derive(Debug, Clone)]
pub struct CryptoGatewayConfig {
    /// API origin, e.g. `https://api.cryptopay.example`.
    pub base_url: String,
    pub api_key: SecretString,
    /// Point-of-sale account id the processor issued for this merchant.
    pub pos_id: String,
}

/// Crypto processor API client.
#[derive(Clone)]
pub struct CryptoClient {
    client: reqwest::Client,
    base_url: String,
    pos_id: String,
}

impl CryptoClient {
    /// Create a new crypto processor client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &CryptoGatewayConfig) -> Result<Self, CryptoGatewayError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "X-Api-Key",
            HeaderValue::from_str(config.api_key.expose_secret())
                .map_err(|e| CryptoGatewayError::Parse(format!("Invalid API key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            pos_id: config.pos_id.clone(),
        })
    }
}

#[async_trait]
impl CryptoGateway for CryptoClient {
    #[instrument(skip(self))]
    async fn quote(
        &self,
        invoice_currency: &str,
        invoice_amount: Decimal,
        target_currency: &str,
    ) -> Result<CryptoQuote, CryptoGatewayError> {
        let url = format!("{}/v1/quotes", self.base_url);

        let body = serde_json::json!({
            "invoice_currency": invoice_currency,
            "invoice_amount": invoice_amount,
            "target_currency": target_currency,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CryptoGatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let quote: QuoteResponse = response
            .json()
            .await
            .map_err(|e| CryptoGatewayError::Parse(e.to_string()))?;

        Ok(CryptoQuote {
            quote_id: quote.quote_id,
            rate: quote.rate,
            crypto_amount: quote.crypto_amount,
        })
    }

    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn start_session(
        &self,
        request: &SessionRequest,
    ) -> Result<CryptoSession, CryptoGatewayError> {
        let url = format!("{}/v1/payment-sessions", self.base_url);

        let body = serde_json::json!({
            "quote_id": request.quote_id,
            "pos_id": self.pos_id,
            "reference_no": request.reference,
            "payer": {
                "name": request.payer.name,
                "email": request.payer.email.as_str(),
            },
            "webhook_url": request.webhook_url,
            "success_url": request.success_url,
            "failure_url": request.failure_url,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        // The processor answers 410 once the quoted price has lapsed.
        if status == StatusCode::GONE {
            return Err(CryptoGatewayError::QuoteExpired);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CryptoGatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| CryptoGatewayError::Parse(e.to_string()))?;

        Ok(CryptoSession {
            redirect_url: session.redirect_url,
            deposit_address: session.deposit_address,
            payment_session_id: session.payment_session_id,
        })
    }

    #[instrument(skip(self))]
    async fn check_status(
        &self,
        payment_session_id: &str,
        deposit_address: &str,
        currency: &str,
    ) -> Result<CryptoPaymentStatus, CryptoGatewayError> {
        let url = format!(
            "{}/v1/payment-sessions/{payment_session_id}/status",
            self.base_url
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("pos_id", self.pos_id.as_str()),
                ("currency", currency),
                ("deposit_address", deposit_address),
            ])
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CryptoGatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: StatusResponse = response
            .json()
            .await
            .map_err(|e| CryptoGatewayError::Parse(e.to_string()))?;

        parse_status(&payload.status)
    }
}

/// Collapse the processor's status vocabulary into the tri-state the engine
/// acts on.
fn parse_status(raw: &str) -> Result<CryptoPaymentStatus, CryptoGatewayError> {
    match raw {
        "confirmed" | "completed" | "paid" => Ok(CryptoPaymentStatus::Confirmed),
        "cancelled" | "canceled" | "expired" | "failed" => Ok(CryptoPaymentStatus::Cancelled),
        "new" | "pending" | "waiting" | "confirming" => Ok(CryptoPaymentStatus::Waiting),
        other => Err(CryptoGatewayError::Parse(format!(
            "unknown payment status: {other}"
        ))),
    }
}

/// Quote payload.
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    quote_id: String,
    rate: Decimal,
    crypto_amount: Decimal,
}

/// Opened-session payload.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    payment_session_id: String,
    deposit_address: String,
    redirect_url: String,
}

/// Status payload.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}
