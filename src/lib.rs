//! Niche Navigator billing service.
//!
//! Synchronizes local subscription state with Stripe: issues hosted checkout
//! and customer-portal sessions, and mirrors provider-side lifecycle changes
//! into the local subscription table via signature-verified webhooks.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use niche_navigator::{App, AppContext, ConfigBuilder};
//! use niche_navigator::auth::GoTrueAuthProvider;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     niche_navigator::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     # let subscriptions: niche_navigator::app::DynSubscriptionStore = unimplemented!();
//!     # let prices: niche_navigator::app::DynPriceStore = unimplemented!();
//!     let auth = Arc::new(GoTrueAuthProvider::new("https://id.example.com", "anon-key"));
//!     let context = AppContext::new(config, subscriptions, prices, auth, None);
//!
//!     App::new(context).serve().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod auth;
pub mod billing;
pub mod config;
pub mod cors;
pub mod error;
pub mod ratelimit;
pub mod routes;

pub use app::{App, AppContext, BillingHandles};
pub use config::{Config, ConfigBuilder, LoggingConfig, ServerConfig};
pub use cors::CorsConfig;
pub use error::{AppError, Result};
pub use ratelimit::{RateLimitConfig, RateLimiter};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with defaults, before config is loaded.
///
/// Respects `RUST_LOG` for filtering and `NICHENAV_LOG_JSON=true` for JSON
/// output.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("NICHENAV_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from a loaded configuration.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
