//! Cart engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `AFRIKRAGA_API_URL` - Base URL of the backend REST API (e.g., `https://api.afrikraga.com/api/`)
//!
//! ## Optional
//! - `AFRIKRAGA_API_TOKEN` - Bearer token for a signed-in customer
//! - `AFRIKRAGA_SESSION_HEADER` - Header carrying the cart session token (default: `X-Session-ID`)
//! - `AFRIKRAGA_STORAGE_DIR` - Directory for the persisted cart (default: `.afrikraga`)
//! - `AFRIKRAGA_CART_CACHE_TTL_SECS` - Server cart cache lifetime (default: 60)
//! - `AFRIKRAGA_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 15)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
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

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Backend cart API configuration
    pub api: ApiConfig,
    /// Directory the cart snapshot and session token are stored in
    pub storage_dir: PathBuf,
    /// How long a fetched server cart may be reused
    pub cache_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Backend cart API configuration.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL, always ending in `/` so endpoint paths join onto it
    pub base_url: Url,
    /// Bearer token for a signed-in customer
    pub token: Option<SecretString>,
    /// Header name carrying the cart session token
    pub session_header: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("session_header", &self.session_header)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if the API token looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`CartConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let base_url = parse_base_url(&env.required("AFRIKRAGA_API_URL")?)?;
        let token = env
            .optional("AFRIKRAGA_API_TOKEN")
            .map(|value| validated_secret(value, "AFRIKRAGA_API_TOKEN"))
            .transpose()?;
        let session_header = env.or_default("AFRIKRAGA_SESSION_HEADER", "X-Session-ID");
        let request_timeout = env.seconds("AFRIKRAGA_REQUEST_TIMEOUT_SECS", 15)?;

        let storage_dir = PathBuf::from(env.or_default("AFRIKRAGA_STORAGE_DIR", ".afrikraga"));
        let cache_ttl = env.seconds("AFRIKRAGA_CART_CACHE_TTL_SECS", 60)?;
        let sentry_dsn = env.optional("SENTRY_DSN");

        Ok(Self {
            api: ApiConfig {
                base_url,
                token,
                session_header,
                request_timeout,
            },
            storage_dir,
            cache_ttl,
            sentry_dsn,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn seconds(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        self.optional(key).map_or(Ok(Duration::from_secs(default)), |value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }
}

/// Parse the API base URL, ensuring it ends in `/`.
fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let invalid = |msg: String| ConfigError::InvalidEnvVar("AFRIKRAGA_API_URL".to_string(), msg);

    let mut url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Reject secrets that look like placeholders left over from a template.
fn validated_secret(value: String, var_name: &str) -> Result<SecretString, ConfigError> {
    let secret = SecretString::from(value);
    let lower = secret.expose_secret().to_lowercase();

    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("appears to be a placeholder (contains '{pattern}')"),
        ));
    }

    Ok(secret)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<CartConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CartConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("AFRIKRAGA_API_URL", "https://api.afrikraga.com/api")]).unwrap();
        assert_eq!(config.api.base_url.as_str(), "https://api.afrikraga.com/api/");
        assert!(config.api.token.is_none());
        assert_eq!(config.api.session_header, "X-Session-ID");
        assert_eq!(config.api.request_timeout, Duration::from_secs(15));
        assert_eq!(config.storage_dir, PathBuf::from(".afrikraga"));
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_missing_api_url() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "AFRIKRAGA_API_URL"));
    }

    #[test]
    fn test_invalid_api_url() {
        assert!(load(&[("AFRIKRAGA_API_URL", "not a url")]).is_err());
        assert!(load(&[("AFRIKRAGA_API_URL", "ftp://api.afrikraga.com/")]).is_err());
    }

    #[test]
    fn test_invalid_numbers() {
        let err = load(&[
            ("AFRIKRAGA_API_URL", "https://api.afrikraga.com/"),
            ("AFRIKRAGA_CART_CACHE_TTL_SECS", "soon"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_placeholder_token_rejected() {
        let err = load(&[
            ("AFRIKRAGA_API_URL", "https://api.afrikraga.com/"),
            ("AFRIKRAGA_API_TOKEN", "your-token-here"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("AFRIKRAGA_API_URL", "http://localhost:8000/"),
            ("AFRIKRAGA_API_TOKEN", "eyJhbGciOi.J9kz"),
            ("AFRIKRAGA_SESSION_HEADER", "X-Cart-Session"),
            ("AFRIKRAGA_STORAGE_DIR", "/var/lib/afrikraga"),
            ("AFRIKRAGA_CART_CACHE_TTL_SECS", "5"),
            ("AFRIKRAGA_REQUEST_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        assert!(config.api.token.is_some());
        assert_eq!(config.api.session_header, "X-Cart-Session");
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/afrikraga"));
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.api.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_api_config_debug_redacts_token() {
        let config = load(&[
            ("AFRIKRAGA_API_URL", "https://api.afrikraga.com/"),
            ("AFRIKRAGA_API_TOKEN", "super_secret_customer_token"),
        ])
        .unwrap();

        let debug_output = format!("{:?}", config.api);
        assert!(debug_output.contains("api.afrikraga.com"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_customer_token"));
    }
}
