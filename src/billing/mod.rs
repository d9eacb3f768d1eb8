//! Billing state synchronization.
//!
//! The local subscription table is a read-optimized mirror of provider
//! state. Checkout and portal sessions are issued here, but every write to
//! the mirror comes from a verified webhook event; user-facing requests
//! never mutate subscription rows directly.

pub mod checkout;
pub mod customer;
pub mod live_client;
pub mod portal;
pub mod postgrest_store;
pub mod store;
pub mod subscription;
pub mod validation;
pub mod webhook;

pub use checkout::{CheckoutManager, CheckoutSession, StripeCheckoutClient};
pub use customer::{CustomerManager, StripeCustomerClient};
pub use live_client::LiveStripeClient;
pub use portal::{PortalManager, PortalSession, StripePortalClient};
pub use postgrest_store::PostgrestStore;
pub use store::{
    PriceRecord, PriceStore, SubscriptionRecord, SubscriptionStatus, SubscriptionStore,
};
pub use subscription::{StripeSubscriptionClient, StripeSubscriptionData};
pub use webhook::{WebhookHandler, WebhookOutcome};

/// The full provider client surface.
///
/// Blanket-implemented for anything carrying all four capabilities, so a
/// single `Arc<dyn StripeClient>` can back every manager.
pub trait StripeClient:
    StripeCustomerClient + StripeCheckoutClient + StripePortalClient + StripeSubscriptionClient
{
}

impl<T> StripeClient for T where
    T: StripeCustomerClient
        + StripeCheckoutClient
        + StripePortalClient
        + StripeSubscriptionClient
        + ?Sized
{
}

/// Test doubles for the provider client traits.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::checkout::{CheckoutSession, CreateCheckoutSessionRequest, StripeCheckoutClient};
    use super::customer::{CreateCustomerRequest, StripeCustomerClient};
    use super::portal::{CreatePortalSessionRequest, PortalSession, StripePortalClient};
    use super::subscription::{StripeSubscriptionClient, StripeSubscriptionData};
    use crate::error::{AppError, Result};

    /// In-memory stand-in for the live provider client.
    ///
    /// Returns canned sessions, mints sequential customer IDs, and serves
    /// subscription lookups from a map seeded by the test.
    #[derive(Default)]
    pub struct MockStripeClient {
        customers_created: AtomicU64,
        subscriptions: Mutex<HashMap<String, StripeSubscriptionData>>,
        checkout_requests: Mutex<Vec<CreateCheckoutSessionRequest>>,
        portal_requests: Mutex<Vec<CreatePortalSessionRequest>>,
    }

    impl MockStripeClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a subscription to be served by `get_subscription`.
        pub fn add_subscription(&self, data: StripeSubscriptionData) {
            self.subscriptions
                .lock()
                .expect("lock")
                .insert(data.id.clone(), data);
        }

        pub fn customers_created(&self) -> u64 {
            self.customers_created.load(Ordering::SeqCst)
        }

        pub fn checkout_requests(&self) -> Vec<CreateCheckoutSessionRequest> {
            self.checkout_requests.lock().expect("lock").clone()
        }

        pub fn portal_requests(&self) -> Vec<CreatePortalSessionRequest> {
            self.portal_requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl StripeCustomerClient for MockStripeClient {
        async fn create_customer(&self, _request: CreateCustomerRequest) -> Result<String> {
            let n = self.customers_created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("cus_MockCustomer{:06}", n))
        }
    }

    #[async_trait]
    impl StripeCheckoutClient for MockStripeClient {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            self.checkout_requests.lock().expect("lock").push(request);
            Ok(CheckoutSession {
                id: "cs_test_mock0001".to_string(),
                url: "https://checkout.stripe.com/c/pay/cs_test_mock0001".to_string(),
            })
        }
    }

    #[async_trait]
    impl StripePortalClient for MockStripeClient {
        async fn create_portal_session(
            &self,
            request: CreatePortalSessionRequest,
        ) -> Result<PortalSession> {
            self.portal_requests.lock().expect("lock").push(request);
            Ok(PortalSession {
                url: "https://billing.stripe.com/p/session/test_mock0001".to_string(),
            })
        }
    }

    #[async_trait]
    impl StripeSubscriptionClient for MockStripeClient {
        async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData> {
            self.subscriptions
                .lock()
                .expect("lock")
                .get(subscription_id)
                .cloned()
                .ok_or_else(|| {
                    AppError::billing_provider(format!(
                        "No such subscription: {subscription_id}"
                    ))
                })
        }
    }
}
