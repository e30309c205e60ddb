//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use coinforge_core::Rate;
use coinforge_engine::gateway::{CardClient, CardGatewayConfig, CryptoClient, CryptoGatewayConfig};
use coinforge_engine::notify::{LogNotifier, Notifier};
use coinforge_engine::services::{CheckoutUrls, OrderService, RateCache, RateService};
use coinforge_engine::store::{FileOrderStore, FileRateStore};

use crate::config::ServerConfig;
use crate::email::EmailClient;

/// Error building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("store error: {0}")]
    Store(#[from] coinforge_engine::store::StoreError),
    #[error("gateway client error: {0}")]
    Gateway(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// order and rate services plus the loaded configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    orders: OrderService,
    rates: RateService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Opens the order and rate files under the configured data directory
    /// and wires the engine services to the processor clients and the email
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns an error if a data file cannot be read, a processor client
    /// cannot be built, or the seeded rate is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, StateError> {
        let default_rate =
            Rate::new(config.default_coin_rate).map_err(|e| StateError::Config(e.to_string()))?;

        let order_store = Arc::new(FileOrderStore::open(config.data_dir.join("orders.json"))?);
        let rate_store = Arc::new(FileRateStore::open(
            config.data_dir.join("rates.json"),
            default_rate,
        )?);

        let notifier: Arc<dyn Notifier> = match &config.email {
            Some(email) => Arc::new(
                EmailClient::new(email).map_err(|e| StateError::Config(e.to_string()))?,
            ),
            None => {
                tracing::warn!("EMAIL_API_KEY not set - notifications will only be logged");
                Arc::new(LogNotifier)
            }
        };

        let card = CardClient::new(&CardGatewayConfig {
            base_url: config.card.base_url.clone(),
            api_key: config.card.api_key.clone(),
        })
        .map_err(|e| StateError::Gateway(e.to_string()))?;

        let crypto = CryptoClient::new(&CryptoGatewayConfig {
            base_url: config.crypto.base_url.clone(),
            api_key: config.crypto.api_key.clone(),
            pos_id: config.crypto.pos_id.clone(),
        })
        .map_err(|e| StateError::Gateway(e.to_string()))?;

        let cache = RateCache::new(Duration::from_secs(config.rate_cache_ttl_secs));
        let rates = RateService::new(
            rate_store,
            cache,
            Arc::clone(&notifier),
            config.admin_email.clone(),
        );

        let base = config.base_url.trim_end_matches('/');
        let urls = CheckoutUrls {
            webhook_url: format!("{base}/webhooks/crypto"),
            success_url: format!("{base}/checkout/complete"),
            failure_url: format!("{base}/checkout/failed"),
        };

        let orders = OrderService::new(
            order_store,
            rates.clone(),
            Arc::new(card),
            Arc::new(crypto),
            notifier,
            urls,
            config.admin_email.clone(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                orders,
                rates,
            }),
        })
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the order service.
    #[must_use]
    pub fn orders(&self) -> &OrderService {
        &self.inner.orders
    }

    /// Get a reference to the rate service.
    #[must_use]
    pub fn rates(&self) -> &RateService {
        &self.inner.rates
    }
}
