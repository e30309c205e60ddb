//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `COINFORGE_BASE_URL` - Public URL for the server (webhook and redirect targets)
//! - `COINFORGE_OPERATOR_TOKEN` - Bearer token for operator routes (min 32 chars, high entropy)
//! - `COINFORGE_ADMIN_EMAIL` - Operator inbox for order and rate alerts
//! - `CARD_GATEWAY_URL` - Card processor API origin
//! - `CARD_GATEWAY_API_KEY` - Card processor API key
//! - `CRYPTO_GATEWAY_URL` - Crypto processor API origin
//! - `CRYPTO_GATEWAY_API_KEY` - Crypto processor API key
//! - `CRYPTO_GATEWAY_POS_ID` - Crypto processor point-of-sale account id
//!
//! ## Optional
//! - `COINFORGE_HOST` - Bind address (default: 127.0.0.1)
//! - `COINFORGE_PORT` - Listen port (default: 3000)
//! - `COINFORGE_DATA_DIR` - Directory for the order and rate files (default: data)
//! - `COINFORGE_DEFAULT_COIN_RATE` - Global coins-per-unit rate seeded on first boot (default: 87)
//! - `COINFORGE_RATE_CACHE_TTL_SECS` - Rate lookup cache TTL (default: 60)
//! - `COINFORGE_WEBHOOK_SECRET` - When set, crypto webhook signatures are enforced
//! - `EMAIL_API_URL` - Transactional email API origin (default: <https://api.postmarkapp.com>)
//! - `EMAIL_API_KEY` - Transactional email server token (enables real delivery)
//! - `EMAIL_FROM` - Sender address (required together with `EMAIL_API_KEY`)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Sentry error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Sentry traces sample rate (default: 1.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use coinforge_core::EmailAddress;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_OPERATOR_TOKEN_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_EMAIL_API_URL: &str = "https://api.postmarkapp.com";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Server application configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the server
    pub base_url: String,
    /// Directory holding the order and rate data files
    pub data_dir: PathBuf,
    /// Global coins-per-unit rate seeded when no rate file exists yet
    pub default_coin_rate: Decimal,
    /// TTL for cached rate lookups, in seconds
    pub rate_cache_ttl_secs: u64,
    /// Operator inbox for order and rate alerts
    pub admin_email: EmailAddress,
    /// Bearer token required on operator routes
    pub operator_token: SecretString,
    /// Shared secret for crypto webhook signatures (disabled when absent)
    pub webhook_secret: Option<SecretString>,
    /// Card processor API configuration
    pub card: CardProcessorConfig,
    /// Crypto processor API configuration
    pub crypto: CryptoProcessorConfig,
    /// Transactional email configuration (logs instead of sending when absent)
    pub email: Option<EmailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Card processor API configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct CardProcessorConfig {
    /// API origin, e.g. `https://api.cardprocessor.example`
    pub base_url: String,
    /// API key used as a bearer token
    pub api_key: SecretString,
}

impl std::fmt::Debug for CardProcessorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardProcessorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Crypto processor API configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct CryptoProcessorConfig {
    /// API origin, e.g. `https://api.cryptopay.example`
    pub base_url: String,
    /// API key sent on every request
    pub api_key: SecretString,
    /// Point-of-sale account id the processor issued for this merchant
    pub pos_id: String,
}

impl std::fmt::Debug for CryptoProcessorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoProcessorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("pos_id", &self.pos_id)
            .finish()
    }
}

/// Transactional email API configuration.
///
/// Implements `Debug` manually to redact the server token.
#[derive(Clone)]
pub struct EmailConfig {
    /// API origin
    pub api_url: String,
    /// Server token sent with every request
    pub api_key: SecretString,
    /// Sender address for all outbound mail
    pub from_address: EmailAddress,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = get_env_or_default("COINFORGE_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("COINFORGE_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("COINFORGE_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("COINFORGE_PORT".to_string(), e.to_string()))?;
        let base_url = get_required_env("COINFORGE_BASE_URL")?;
        validate_base_url(&base_url)?;

        let data_dir = PathBuf::from(get_env_or_default("COINFORGE_DATA_DIR", "data"));
        let default_coin_rate = parse_coin_rate(&get_env_or_default("COINFORGE_DEFAULT_COIN_RATE", "87"))?;
        let rate_cache_ttl_secs = get_env_or_default("COINFORGE_RATE_CACHE_TTL_SECS", "60")
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("COINFORGE_RATE_CACHE_TTL_SECS".to_string(), e.to_string())
            })?;

        let admin_email = parse_email_var("COINFORGE_ADMIN_EMAIL")?;

        let operator_token = get_validated_secret("COINFORGE_OPERATOR_TOKEN")?;
        validate_operator_token(&operator_token, "COINFORGE_OPERATOR_TOKEN")?;

        let webhook_secret = match get_optional_env("COINFORGE_WEBHOOK_SECRET") {
            Some(value) => {
                validate_secret_strength(&value, "COINFORGE_WEBHOOK_SECRET")?;
                Some(SecretString::from(value))
            }
            None => None,
        };

        let card = CardProcessorConfig::from_env()?;
        let crypto = CryptoProcessorConfig::from_env()?;
        let email = EmailConfig::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            host,
            port,
            base_url,
            data_dir,
            default_coin_rate,
            rate_cache_ttl_secs,
            admin_email,
            operator_token,
            webhook_secret,
            card,
            crypto,
            email,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl CardProcessorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: get_required_env("CARD_GATEWAY_URL")?,
            api_key: get_validated_secret("CARD_GATEWAY_API_KEY")?,
        })
    }
}

impl CryptoProcessorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: get_required_env("CRYPTO_GATEWAY_URL")?,
            api_key: get_validated_secret("CRYPTO_GATEWAY_API_KEY")?,
            pos_id: get_required_env("CRYPTO_GATEWAY_POS_ID")?,
        })
    }
}

impl EmailConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let api_key = get_optional_env("EMAIL_API_KEY");
        let from = get_optional_env("EMAIL_FROM");

        match (api_key, from) {
            (Some(key), Some(from)) => {
                validate_secret_strength(&key, "EMAIL_API_KEY")?;
                let from_address = EmailAddress::parse(&from).map_err(|e| {
                    ConfigError::InvalidEnvVar("EMAIL_FROM".to_string(), e.to_string())
                })?;
                Ok(Some(Self {
                    api_url: get_env_or_default("EMAIL_API_URL", DEFAULT_EMAIL_API_URL),
                    api_key: SecretString::from(key),
                    from_address,
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "EMAIL_*".to_string(),
                "Both EMAIL_API_KEY and EMAIL_FROM must be set together".to_string(),
            )),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a required environment variable as an email address.
fn parse_email_var(key: &str) -> Result<EmailAddress, ConfigError> {
    let value = get_required_env(key)?;
    EmailAddress::parse(&value)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse and range-check a coins-per-unit rate.
fn parse_coin_rate(raw: &str) -> Result<Decimal, ConfigError> {
    let rate = raw.parse::<Decimal>().map_err(|e| {
        ConfigError::InvalidEnvVar("COINFORGE_DEFAULT_COIN_RATE".to_string(), e.to_string())
    })?;
    if rate <= Decimal::ZERO {
        return Err(ConfigError::InvalidEnvVar(
            "COINFORGE_DEFAULT_COIN_RATE".to_string(),
            format!("must be positive (got {rate})"),
        ));
    }
    Ok(rate)
}

/// Validate that the base URL parses and carries a host.
fn validate_base_url(base_url: &str) -> Result<(), ConfigError> {
    let url = Url::parse(base_url).map_err(|e| {
        ConfigError::InvalidEnvVar("COINFORGE_BASE_URL".to_string(), e.to_string())
    })?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidEnvVar(
            "COINFORGE_BASE_URL".to_string(),
            "must include a host".to_string(),
        ));
    }
    Ok(())
}

/// Validate that the operator token meets minimum length requirements.
fn validate_operator_token(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_OPERATOR_TOKEN_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_OPERATOR_TOKEN_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Real API keys are random; low entropy means a made-up value
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
