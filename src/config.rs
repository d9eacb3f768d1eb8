use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::cors::CorsConfig;
use crate::ratelimit::RateLimitConfig;

/// Get environment variable with NICHENAV_ prefix, falling back to the
/// unprefixed version.
///
/// Checks `NICHENAV_{key}` first, then `{key}` for compatibility with
/// standard naming (e.g. `STRIPE_SECRET_KEY` as provisioned by the platform).
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("NICHENAV_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Main configuration for the billing service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(skip)]
    pub billing: BillingConfig,
    #[serde(skip)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Development mode: relaxes cookie security (no `Secure` flag) so
    /// local HTTP logins work.
    #[serde(default)]
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

/// Stripe credentials and the app base URL used for redirect targets.
///
/// Both secrets are optional so the service can boot without Stripe; billing
/// endpoints return 503 until they are set. Secrets are held in
/// `SecretString` so they never appear in Debug output or logs.
#[derive(Debug, Clone, Default)]
pub struct BillingConfig {
    pub secret_key: Option<SecretString>,
    pub webhook_secret: Option<SecretString>,
    pub app_url: String,
}

impl BillingConfig {
    pub fn is_configured(&self) -> bool {
        self.secret_key.is_some() && self.webhook_secret.is_some()
    }

    pub fn from_env() -> Self {
        Self {
            secret_key: get_env_with_prefix("STRIPE_SECRET_KEY").map(SecretString::from),
            webhook_secret: get_env_with_prefix("STRIPE_WEBHOOK_SECRET").map(SecretString::from),
            app_url: get_env_with_prefix("APP_URL").unwrap_or_else(default_app_url),
        }
    }
}

/// PostgREST-compatible data API holding the subscription mirror.
///
/// The service key bypasses row-level security, so it is held in a
/// `SecretString` and must never reach a browser.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub rest_url: Option<String>,
    pub service_key: Option<SecretString>,
}

impl DatabaseConfig {
    pub fn is_configured(&self) -> bool {
        self.rest_url.is_some() && self.service_key.is_some()
    }

    pub fn from_env() -> Self {
        Self {
            rest_url: get_env_with_prefix("DATABASE_REST_URL")
                .or_else(|| get_env_with_prefix("SUPABASE_URL")),
            service_key: get_env_with_prefix("DATABASE_SERVICE_KEY")
                .or_else(|| get_env_with_prefix("SUPABASE_SERVICE_ROLE_KEY"))
                .map(SecretString::from),
        }
    }
}

/// GoTrue-style auth upstream used to resolve access tokens to users.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub base_url: Option<String>,
    pub publishable_key: Option<String>,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: get_env_with_prefix("AUTH_BASE_URL")
                .or_else(|| get_env_with_prefix("SUPABASE_URL")),
            publishable_key: get_env_with_prefix("AUTH_PUBLISHABLE_KEY")
                .or_else(|| get_env_with_prefix("SUPABASE_ANON_KEY")),
            cookie_name: get_env_with_prefix("AUTH_COOKIE_NAME")
                .unwrap_or_else(default_cookie_name),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            billing: BillingConfig {
                secret_key: None,
                webhook_secret: None,
                app_url: default_app_url(),
            },
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            dev_mode: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            publishable_key: None,
            cookie_name: default_cookie_name(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json() -> bool {
    false
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_cookie_name() -> String {
    "sb-access-token".to_string()
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.server.max_body_size = max_body_size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = cors;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn with_billing(mut self, billing: BillingConfig) -> Self {
        self.config.billing = billing;
        self
    }

    pub fn with_stripe_keys(
        mut self,
        secret_key: impl Into<SecretString>,
        webhook_secret: impl Into<SecretString>,
    ) -> Self {
        self.config.billing.secret_key = Some(secret_key.into());
        self.config.billing.webhook_secret = Some(webhook_secret.into());
        self
    }

    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.config.billing.app_url = app_url.into();
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.config.database = database;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn with_dev_mode(mut self, enabled: bool) -> Self {
        self.config.dev_mode = enabled;
        self
    }

    /// Load configuration from environment variables with NICHENAV_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        // NICHENAV_PORT first, then PORT (Railway/Heroku compatibility)
        if let Some(port) = get_env_with_prefix("PORT") {
            if let Ok(p) = port.parse() {
                self.config.server.port = p;
            }
        }
        if let Some(max_body_size) = get_env_with_prefix("MAX_BODY_SIZE") {
            if let Ok(size) = max_body_size.parse() {
                self.config.server.max_body_size = size;
            }
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }
        if let Some(dev) = get_env_with_prefix("DEV_MODE") {
            self.config.dev_mode = dev.parse().unwrap_or(false);
        }

        self.config.cors = CorsConfig::from_env();
        self.config.rate_limit = RateLimitConfig::from_env();
        self.config.billing = BillingConfig::from_env();
        self.config.database = DatabaseConfig::from_env();
        self.config.auth = AuthConfig::from_env();

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration is invalid:
    /// - Invalid server address (host:port)
    /// - Invalid log level
    /// - Invalid rate limit settings
    /// - App base URL that does not parse as an absolute URL
    pub fn build(self) -> crate::error::Result<Config> {
        self.config.server.addr().map_err(|e| {
            crate::error::AppError::validation(format!(
                "Invalid server address {}:{} - {}",
                self.config.server.host, self.config.server.port, e
            ))
        })?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(crate::error::AppError::validation(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if self.config.rate_limit.enabled && self.config.rate_limit.max_requests == 0 {
            return Err(crate::error::AppError::validation(
                "Rate limit max_requests must be greater than 0 when enabled",
            ));
        }

        url::Url::parse(&self.config.billing.app_url).map_err(|e| {
            crate::error::AppError::validation(format!(
                "Invalid app URL {}: {}",
                self.config.billing.app_url, e
            ))
        })?;

        if self.config.server.port == 0 {
            return Err(crate::error::AppError::validation(
                "Server port must be greater than 0",
            ));
        }

        if self.config.server.max_body_size == 0 {
            return Err(crate::error::AppError::validation(
                "Maximum body size must be greater than 0",
            ));
        }

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConfigBuilder::new().build().expect("default config");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.rate_limit.max_requests, 30);
        assert!(!config.billing.is_configured());
        assert_eq!(config.auth.cookie_name, "sb-access-token");
    }

    #[test]
    fn billing_configured_requires_both_secrets() {
        let config = ConfigBuilder::new()
            .with_stripe_keys("sk_test_4eC39HqLyjWDarjtT1zdp7dc", "whsec_abc123")
            .build()
            .expect("config");
        assert!(config.billing.is_configured());

        let mut partial = BillingConfig::default();
        partial.secret_key = Some(SecretString::from("sk_test_4eC39HqLyjWDarjtT1zdp7dc"));
        assert!(!partial.is_configured());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let result = ConfigBuilder::new().with_log_level("verbose").build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_app_url() {
        let result = ConfigBuilder::new().with_app_url("not a url").build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_zero_rate_limit() {
        let mut rate_limit = RateLimitConfig::default();
        rate_limit.enabled = true;
        rate_limit.max_requests = 0;
        let result = ConfigBuilder::new().with_rate_limit(rate_limit).build();
        assert!(result.is_err());
    }

    #[test]
    fn env_prefix_takes_precedence() {
        std::env::set_var("NICHENAV_APP_URL", "https://app.example.com");
        std::env::set_var("APP_URL", "https://other.example.com");
        let billing = BillingConfig::from_env();
        assert_eq!(billing.app_url, "https://app.example.com");
        std::env::remove_var("NICHENAV_APP_URL");
        std::env::remove_var("APP_URL");
    }
}
