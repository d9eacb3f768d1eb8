//! Application assembly.
//!
//! Wires configuration, stores, the provider client, and the auth provider
//! into an axum router and serves it with graceful shutdown.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::auth::AuthProvider;
use crate::billing::{
    CheckoutManager, PortalManager, PriceStore, StripeClient, SubscriptionStore, WebhookHandler,
};
use crate::config::Config;
use crate::ratelimit::{GovernorRateLimiter, RateLimiter};
use crate::routes;

pub type DynSubscriptionStore = Arc<dyn SubscriptionStore>;
pub type DynPriceStore = Arc<dyn PriceStore>;
pub type DynStripeClient = Arc<dyn StripeClient>;

/// Billing managers, present only when the provider is configured.
///
/// When `None`, billing endpoints return 503 instead of failing deep inside
/// a handler with a missing-key error.
#[derive(Clone)]
pub struct BillingHandles {
    pub checkout: Arc<CheckoutManager<DynSubscriptionStore, DynPriceStore, DynStripeClient>>,
    pub portal: Arc<PortalManager<DynSubscriptionStore, DynStripeClient>>,
    pub webhook: Arc<WebhookHandler<DynSubscriptionStore, DynPriceStore, DynStripeClient>>,
}

impl BillingHandles {
    #[must_use]
    pub fn new(
        subscriptions: DynSubscriptionStore,
        prices: DynPriceStore,
        client: DynStripeClient,
        app_url: &str,
        webhook_secret: SecretString,
    ) -> Self {
        Self {
            checkout: Arc::new(CheckoutManager::new(
                subscriptions.clone(),
                prices.clone(),
                client.clone(),
                app_url,
            )),
            portal: Arc::new(PortalManager::new(
                subscriptions.clone(),
                client.clone(),
                app_url,
            )),
            webhook: Arc::new(WebhookHandler::new(
                subscriptions,
                prices,
                client,
                webhook_secret,
            )),
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub subscriptions: DynSubscriptionStore,
    pub prices: DynPriceStore,
    pub billing: Option<BillingHandles>,
    pub limiter: Arc<dyn RateLimiter>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppContext {
    /// Assemble the context, constructing billing managers when both the
    /// provider client and the webhook secret are available.
    #[must_use]
    pub fn new(
        config: Config,
        subscriptions: DynSubscriptionStore,
        prices: DynPriceStore,
        auth: Arc<dyn AuthProvider>,
        billing_client: Option<DynStripeClient>,
    ) -> Self {
        let limiter: Arc<dyn RateLimiter> =
            Arc::new(GovernorRateLimiter::new(&config.rate_limit));

        let billing = match (billing_client, config.billing.webhook_secret.clone()) {
            (Some(client), Some(webhook_secret)) => Some(BillingHandles::new(
                subscriptions.clone(),
                prices.clone(),
                client,
                &config.billing.app_url,
                webhook_secret,
            )),
            _ => {
                tracing::warn!(
                    "billing provider not configured; billing endpoints will return 503"
                );
                None
            }
        };

        Self {
            config: Arc::new(config),
            subscriptions,
            prices,
            billing,
            limiter,
            auth,
        }
    }
}

/// The assembled application.
pub struct App {
    context: AppContext,
}

impl App {
    #[must_use]
    pub fn new(context: AppContext) -> Self {
        Self { context }
    }

    fn build_router(&self) -> Router {
        let mut router = routes::router()
            .layer(DefaultBodyLimit::max(self.context.config.server.max_body_size))
            .layer(TraceLayer::new_for_http())
            .with_state(self.context.clone());

        if let Some(cors_layer) = crate::cors::build_cors_layer(&self.context.config.cors) {
            router = router.layer(cors_layer);
        }

        router
    }

    /// Router with state applied, for in-process testing.
    #[must_use]
    pub fn into_test_router(self) -> Router {
        self.build_router()
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let addr = self
            .context
            .config
            .server
            .addr()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("server starting on http://{addr}");
        tracing::info!("health check available at http://{addr}/health");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received terminate signal, starting graceful shutdown");
        },
    }

    // Grace period for in-flight connections
    tokio::time::sleep(Duration::from_secs(1)).await;
    tracing::info!("shutdown complete");
}
