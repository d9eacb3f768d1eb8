use axum::http::{HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::get_env_with_prefix;

/// CORS configuration.
///
/// Disabled by default; the service must explicitly enable it and list the
/// app origin(s). Browser-facing billing endpoints additionally check the
/// `Origin` header against this whitelist so that a disallowed cross-origin
/// request gets a hard 403 instead of a silent missing-header response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Allowed origins (e.g. ["https://nichenavigator.com"]).
    /// Use ["*"] to allow all origins (not recommended for production).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Whether to allow credentials (cookies, authorization headers)
    #[serde(default)]
    pub allow_credentials: bool,

    /// Maximum age for preflight request caching (in seconds)
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            // Disabled with no origins until explicitly configured
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            allow_credentials: false,
            max_age_seconds: default_max_age(),
        }
    }
}

impl CorsConfig {
    /// Restrictive preset for production: the given origins only, cookies
    /// allowed so the session cookie reaches the API.
    pub fn restrictive(allowed_origins: Vec<String>) -> Self {
        Self {
            enabled: true,
            allowed_origins,
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: default_allowed_headers(),
            allow_credentials: true,
            max_age_seconds: default_max_age(),
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = get_env_with_prefix("CORS_ENABLED") {
            config.enabled = enabled.parse().unwrap_or(true);
        }
        if let Some(origins) = get_env_with_prefix("CORS_ALLOWED_ORIGINS") {
            config.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(methods) = get_env_with_prefix("CORS_ALLOWED_METHODS") {
            config.allowed_methods = methods.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(headers) = get_env_with_prefix("CORS_ALLOWED_HEADERS") {
            config.allowed_headers = headers.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(credentials) = get_env_with_prefix("CORS_ALLOW_CREDENTIALS") {
            config.allow_credentials = credentials.parse().unwrap_or(false);
        }
        if let Some(max_age) = get_env_with_prefix("CORS_MAX_AGE") {
            if let Ok(val) = max_age.parse() {
                config.max_age_seconds = val;
            }
        }

        config
    }

    /// Check an `Origin` header value against the whitelist.
    ///
    /// Returns true when CORS is disabled (same-origin deployments) so
    /// handlers only enforce the whitelist once one is configured.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if !self.enabled {
            return true;
        }
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }
}

fn default_allowed_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
}

fn default_allowed_headers() -> Vec<String> {
    vec![
        "content-type".to_string(),
        "authorization".to_string(),
        "stripe-signature".to_string(),
    ]
}

fn default_max_age() -> u64 {
    3600
}

/// Build a tower-http CorsLayer from a CorsConfig
pub fn build_cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if !config.enabled {
        return None;
    }

    let mut layer = CorsLayer::new();

    if config.allowed_origins.len() == 1 && config.allowed_origins[0] == "*" {
        layer = layer.allow_origin(Any);
    } else if !config.allowed_origins.is_empty() {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer = layer.allow_origin(origins);
    }
    // No origins configured: leave the layer at its most restrictive default.

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    if !methods.is_empty() {
        layer = layer.allow_methods(methods);
    }

    if config.allowed_headers.len() == 1 && config.allowed_headers[0] == "*" {
        layer = layer.allow_headers(Any);
    } else {
        let headers: Vec<_> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        if !headers.is_empty() {
            layer = layer.allow_headers(headers);
        }
    }

    if config.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    layer = layer.max_age(Duration::from_secs(config.max_age_seconds));

    Some(layer)
}
