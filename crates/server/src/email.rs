//! Transactional email client implementing the engine's notifier port.
//!
//! Talks to a Postmark-compatible API. Message content here is deliberately
//! plain: a subject and a short text body per notification kind.

use async_trait::async_trait;
use coinforge_core::EmailAddress;
use coinforge_engine::notify::{Notification, Notifier, NotifierError};
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::EmailConfig;

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to build the client or parse a response.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Transactional email API client.
#[derive(Clone)]
pub struct EmailClient {
    client: reqwest::Client,
    api_url: String,
    from_address: EmailAddress,
}

impl EmailClient {
    /// Create a new email API client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "X-Postmark-Server-Token",
            HeaderValue::from_str(config.api_key.expose_secret())
                .map_err(|e| EmailError::Parse(format!("Invalid API key format: {e}")))?,
        );
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            from_address: config.from_address.clone(),
        })
    }

    /// Send a single text email.
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or reports a non-success status.
    pub async fn send_text(
        &self,
        to: &EmailAddress,
        subject: &str,
        body: &str,
    ) -> Result<(), EmailError> {
        let url = format!("{}/email", self.api_url);

        let payload = json!({
            "From": self.from_address.as_str(),
            "To": to.as_str(),
            "Subject": subject,
            "TextBody": body,
            "MessageStream": "outbound",
        });

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmailError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(to = %to, subject = subject, "email accepted for delivery");
        Ok(())
    }
}

/// Render a notification into a subject line and text body.
fn render(notification: &Notification) -> (String, String) {
    match notification {
        Notification::VerificationCode { order_id, code } => (
            "Your verification code".to_string(),
            format!(
                "Your verification code is {code}. It expires in 10 minutes.\n\n\
                 Order reference: {order_id}"
            ),
        ),
        Notification::PaymentReceipt {
            order_id,
            amount,
            coins,
        } => (
            "Payment received".to_string(),
            format!(
                "We received your payment of {amount}. {coins} coins will be \
                 credited to your account shortly.\n\nOrder reference: {order_id}"
            ),
        ),
        Notification::NewOrderAlert {
            order_id,
            customer,
            amount,
            method,
        } => (
            format!("New order {order_id}"),
            format!("{customer} paid {amount} via {method}."),
        ),
        Notification::RateChanged {
            old_rate,
            new_rate,
            note,
        } => {
            let body = match (old_rate, new_rate) {
                (Some(old), Some(new)) => {
                    format!("The coin rate changed from {old} to {new} per unit.")
                }
                (None, Some(new)) => format!("Your coin rate is now {new} per unit."),
                (Some(old), None) => format!(
                    "Your custom coin rate of {old} per unit was removed. \
                     The standard rate now applies."
                ),
                (None, None) => "Your coin rate was updated.".to_string(),
            };
            let body = match note {
                Some(note) => format!("{body}\n\nNote: {note}"),
                None => body,
            };
            ("Coin rate update".to_string(), body)
        }
        Notification::FulfillmentConfirmed {
            order_id,
            coins,
            account_id,
        } => (
            "Your coins have been delivered".to_string(),
            format!(
                "{coins} coins were credited to account {account_id}.\n\n\
                 Order reference: {order_id}"
            ),
        ),
    }
}

#[async_trait]
impl Notifier for EmailClient {
    async fn send(
        &self,
        recipient: &EmailAddress,
        notification: &Notification,
    ) -> Result<(), NotifierError> {
        let (subject, body) = render(notification);
        self.send_text(recipient, &subject, &body)
            .await
            .map_err(|e| NotifierError::Transport(e.to_string()))
    }
}
