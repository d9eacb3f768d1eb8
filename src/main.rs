use anyhow::Context as _;
use secrecy::ExposeSecret;
use std::sync::Arc;

use niche_navigator::app::{DynPriceStore, DynStripeClient, DynSubscriptionStore};
use niche_navigator::auth::GoTrueAuthProvider;
use niche_navigator::billing::{LiveStripeClient, PostgrestStore};
use niche_navigator::{App, AppContext, ConfigBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    niche_navigator::init_tracing();

    let config = ConfigBuilder::new().from_env().build()?;

    let rest_url = config
        .database
        .rest_url
        .clone()
        .context("DATABASE_REST_URL or SUPABASE_URL must be set")?;
    let service_key = config
        .database
        .service_key
        .clone()
        .context("DATABASE_SERVICE_KEY or SUPABASE_SERVICE_ROLE_KEY must be set")?;
    let store = Arc::new(PostgrestStore::new(rest_url, service_key));
    let subscriptions: DynSubscriptionStore = store.clone();
    let prices: DynPriceStore = store;

    let auth_base = config
        .auth
        .base_url
        .clone()
        .context("AUTH_BASE_URL or SUPABASE_URL must be set")?;
    let auth_key = config
        .auth
        .publishable_key
        .clone()
        .context("AUTH_PUBLISHABLE_KEY or SUPABASE_ANON_KEY must be set")?;
    let auth = Arc::new(GoTrueAuthProvider::new(auth_base, auth_key));

    // Boot without Stripe is allowed; billing endpoints answer 503 until
    // both keys are provided.
    let billing_client: Option<DynStripeClient> = match &config.billing.secret_key {
        Some(key) => {
            let client = LiveStripeClient::new(key.expose_secret())?;
            tracing::info!(test_mode = client.is_test_mode(), "stripe client initialized");
            Some(Arc::new(client) as DynStripeClient)
        }
        None => None,
    };

    let context = AppContext::new(config, subscriptions, prices, auth, billing_client);
    App::new(context).serve().await?;

    Ok(())
}
