//! Checkout session creation.
//!
//! Issues hosted subscription-mode checkout sessions. No local row is
//! written here; the subscription mirror is only updated once the provider
//! confirms the purchase via webhook.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::customer::{CustomerManager, StripeCustomerClient};
use super::store::{PriceStore, SubscriptionStore};
use super::validation::validate_price_id;
use crate::error::{AppError, Result};

/// A created checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Request to create a checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutSessionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Carried through to `checkout.session.completed`; must contain
    /// `user_id` and `product_id` for the webhook to attribute the purchase.
    pub metadata: HashMap<String, String>,
}

/// Client capability: create checkout sessions.
#[async_trait]
pub trait StripeCheckoutClient: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession>;
}

#[async_trait]
impl<T: StripeCheckoutClient + ?Sized> StripeCheckoutClient for Arc<T> {
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        (**self).create_checkout_session(request).await
    }
}

/// Checkout session management.
pub struct CheckoutManager<S, P, C>
where
    S: SubscriptionStore + Clone,
    P: PriceStore,
    C: StripeCustomerClient + StripeCheckoutClient + Clone,
{
    store: S,
    prices: P,
    client: C,
    app_url: String,
}

impl<S, P, C> CheckoutManager<S, P, C>
where
    S: SubscriptionStore + Clone,
    P: PriceStore,
    C: StripeCustomerClient + StripeCheckoutClient + Clone,
{
    #[must_use]
    pub fn new(store: S, prices: P, client: C, app_url: impl Into<String>) -> Self {
        Self {
            store,
            prices,
            client,
            app_url: app_url.into(),
        }
    }

    /// Create a subscription-mode checkout session for a price.
    ///
    /// Rejects prices absent from the catalog and users who already hold an
    /// active subscription (they manage it through the portal instead).
    pub async fn create_session(
        &self,
        user_id: &str,
        email: &str,
        price_id: &str,
    ) -> Result<CheckoutSession> {
        validate_price_id(price_id)?;

        let price = self
            .prices
            .get_by_stripe_price_id(price_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| AppError::validation("Invalid price ID"))?;

        if self.store.get_active_for_user(user_id).await?.is_some() {
            tracing::warn!(user_id, "checkout attempted with existing subscription");
            return Err(AppError::validation(
                "You already have an active subscription. Use the customer portal to manage it.",
            ));
        }

        let customers = CustomerManager::new(self.store.clone(), self.client.clone());
        let customer_id = customers.resolve_or_create(user_id, email).await?;

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("product_id".to_string(), price.product_id.clone());

        let session = self
            .client
            .create_checkout_session(CreateCheckoutSessionRequest {
                customer_id,
                price_id: price_id.to_string(),
                success_url: format!("{}/subscriptions?success=true", self.app_url),
                cancel_url: format!("{}/subscriptions?canceled=true", self.app_url),
                metadata,
            })
            .await?;

        tracing::info!(user_id, session_id = %session.id, "checkout session created");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::customer::CreateCustomerRequest;
    use crate::billing::store::test::InMemoryStore;
    use crate::billing::store::{PriceRecord, SubscriptionRecord, SubscriptionStatus};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockClient {
        requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    }

    #[async_trait]
    impl StripeCustomerClient for MockClient {
        async fn create_customer(&self, _request: CreateCustomerRequest) -> Result<String> {
            Ok("cus_MockCustomer0001".to_string())
        }
    }

    #[async_trait]
    impl StripeCheckoutClient for MockClient {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            self.requests.lock().expect("lock").push(request);
            Ok(CheckoutSession {
                id: "cs_test_mock0001".to_string(),
                url: "https://checkout.stripe.com/c/pay/cs_test_mock0001".to_string(),
            })
        }
    }

    const PRICE_ID: &str = "price_1OaBcDeFgHiJkLmNoPqRsTuV";

    fn store_with_price() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.add_price(PriceRecord {
            stripe_price_id: PRICE_ID.to_string(),
            product_id: "pro-monthly".to_string(),
            name: "Pro (monthly)".to_string(),
            active: true,
        });
        store
    }

    fn manager(store: InMemoryStore, client: MockClient) -> CheckoutManager<InMemoryStore, InMemoryStore, MockClient> {
        CheckoutManager::new(store.clone(), store, client, "https://app.example.com")
    }

    #[tokio::test]
    async fn creates_session_with_attribution_metadata() {
        let store = store_with_price();
        let client = MockClient::default();
        let manager = manager(store.clone(), client.clone());

        let session = manager
            .create_session("7f8d9e0a-1b2c-4d3e-8f90-a1b2c3d4e5f6", "u@example.com", PRICE_ID)
            .await
            .expect("session");
        assert!(session.url.contains("checkout.stripe.com"));

        let requests = client.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].metadata.get("product_id").map(String::as_str),
            Some("pro-monthly")
        );
        assert_eq!(
            requests[0].success_url,
            "https://app.example.com/subscriptions?success=true"
        );

        // No local row until the webhook confirms the purchase
        assert!(store.all_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn rejects_unknown_price() {
        let store = InMemoryStore::new();
        let manager = manager(store, MockClient::default());
        let err = manager
            .create_session("u1", "u@example.com", PRICE_ID)
            .await
            .expect_err("unknown price");
        assert!(err.to_string().contains("Invalid price ID"));
    }

    #[tokio::test]
    async fn rejects_malformed_price_id() {
        let store = store_with_price();
        let manager = manager(store, MockClient::default());
        assert!(manager
            .create_session("u1", "u@example.com", "price_short")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rejects_user_with_active_subscription() {
        let store = store_with_price();
        store.insert_subscription(SubscriptionRecord {
            user_id: "u1".to_string(),
            product_id: "pro-monthly".to_string(),
            stripe_subscription_id: "sub_existing001".to_string(),
            stripe_customer_id: "cus_Existing123456".to_string(),
            status: SubscriptionStatus::Active,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            updated_at: 0,
        });

        let manager = manager(store, MockClient::default());
        let err = manager
            .create_session("u1", "u@example.com", PRICE_ID)
            .await
            .expect_err("duplicate subscription");
        assert!(err.to_string().contains("already have an active subscription"));
    }

    #[tokio::test]
    async fn inactive_price_is_not_purchasable() {
        let store = InMemoryStore::new();
        store.add_price(PriceRecord {
            stripe_price_id: PRICE_ID.to_string(),
            product_id: "legacy".to_string(),
            name: "Legacy plan".to_string(),
            active: false,
        });

        let manager = manager(store, MockClient::default());
        assert!(manager
            .create_session("u1", "u@example.com", PRICE_ID)
            .await
            .is_err());
    }
}
