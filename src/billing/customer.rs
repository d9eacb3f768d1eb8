//! Stripe customer resolution.
//!
//! Customers are created lazily on first checkout and reused afterwards: any
//! prior subscription row carrying a customer ID wins over creating a new
//! one. Creation is not rolled back if a later step fails; the orphaned
//! customer is reused on the next attempt, so the operation is idempotent in
//! effect.

use async_trait::async_trait;
use std::sync::Arc;

use super::store::SubscriptionStore;
use crate::error::Result;

/// Request to create a provider customer.
#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    pub email: String,
    /// Recorded as customer metadata for attribution.
    pub user_id: String,
}

/// Client capability: create customers.
#[async_trait]
pub trait StripeCustomerClient: Send + Sync {
    /// Create a customer and return its ID.
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String>;
}

#[async_trait]
impl<T: StripeCustomerClient + ?Sized> StripeCustomerClient for Arc<T> {
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
        (**self).create_customer(request).await
    }
}

/// Customer lifecycle operations.
pub struct CustomerManager<S: SubscriptionStore, C: StripeCustomerClient> {
    store: S,
    client: C,
}

impl<S: SubscriptionStore, C: StripeCustomerClient> CustomerManager<S, C> {
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Return the user's existing customer ID, creating one when no prior
    /// subscription row carries one.
    pub async fn resolve_or_create(&self, user_id: &str, email: &str) -> Result<String> {
        if let Some(customer_id) = self.store.find_customer_id_for_user(user_id).await? {
            tracing::debug!(user_id, customer_id, "using existing stripe customer");
            return Ok(customer_id);
        }

        let customer_id = self
            .client
            .create_customer(CreateCustomerRequest {
                email: email.to_string(),
                user_id: user_id.to_string(),
            })
            .await?;

        tracing::info!(user_id, customer_id, "created new stripe customer");
        Ok(customer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::store::test::InMemoryStore;
    use crate::billing::store::{SubscriptionRecord, SubscriptionStatus};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingClient {
        created: AtomicU64,
    }

    #[async_trait]
    impl StripeCustomerClient for CountingClient {
        async fn create_customer(&self, _request: CreateCustomerRequest) -> Result<String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("cus_MockCustomer{:06}", n))
        }
    }

    #[tokio::test]
    async fn reuses_customer_from_prior_row() {
        let store = InMemoryStore::new();
        store.insert_subscription(SubscriptionRecord {
            user_id: "u1".to_string(),
            product_id: "pro-monthly".to_string(),
            stripe_subscription_id: "sub_old".to_string(),
            stripe_customer_id: "cus_Existing123456".to_string(),
            status: SubscriptionStatus::Canceled,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            updated_at: 0,
        });

        let client = CountingClient {
            created: AtomicU64::new(0),
        };
        let manager = CustomerManager::new(store, client);

        let customer_id = manager
            .resolve_or_create("u1", "u1@example.com")
            .await
            .expect("resolve");
        assert_eq!(customer_id, "cus_Existing123456");
        assert_eq!(manager.client.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn creates_customer_for_new_user() {
        let store = InMemoryStore::new();
        let client = CountingClient {
            created: AtomicU64::new(0),
        };
        let manager = CustomerManager::new(store, client);

        let customer_id = manager
            .resolve_or_create("u2", "u2@example.com")
            .await
            .expect("resolve");
        assert!(customer_id.starts_with("cus_"));
        assert_eq!(manager.client.created.load(Ordering::SeqCst), 1);
    }
}
