//! Customer portal session creation.
//!
//! The hosted portal is the only place users change or cancel an existing
//! subscription; this service never mutates provider state for them. A
//! portal session requires a previously recorded customer ID.

use async_trait::async_trait;
use std::sync::Arc;

use super::store::SubscriptionStore;
use crate::error::{AppError, Result};

/// A created portal session.
#[derive(Debug, Clone)]
pub struct PortalSession {
    pub url: String,
}

/// Request to create a portal session.
#[derive(Debug, Clone)]
pub struct CreatePortalSessionRequest {
    pub customer_id: String,
    pub return_url: String,
}

/// Client capability: create billing portal sessions.
#[async_trait]
pub trait StripePortalClient: Send + Sync {
    async fn create_portal_session(
        &self,
        request: CreatePortalSessionRequest,
    ) -> Result<PortalSession>;
}

#[async_trait]
impl<T: StripePortalClient + ?Sized> StripePortalClient for Arc<T> {
    async fn create_portal_session(
        &self,
        request: CreatePortalSessionRequest,
    ) -> Result<PortalSession> {
        (**self).create_portal_session(request).await
    }
}

/// Portal session management.
pub struct PortalManager<S: SubscriptionStore, C: StripePortalClient> {
    store: S,
    client: C,
    app_url: String,
}

impl<S: SubscriptionStore, C: StripePortalClient> PortalManager<S, C> {
    #[must_use]
    pub fn new(store: S, client: C, app_url: impl Into<String>) -> Self {
        Self {
            store,
            client,
            app_url: app_url.into(),
        }
    }

    /// Create a portal session for the user's recorded customer.
    ///
    /// Returns a validation error when the user has no subscription row with
    /// a customer ID, since the portal has nothing to manage.
    pub async fn create_session(&self, user_id: &str) -> Result<PortalSession> {
        let customer_id = self
            .store
            .find_customer_id_for_user(user_id)
            .await?
            .ok_or_else(|| {
                AppError::validation(
                    "No active subscription found. Please subscribe to a plan first.",
                )
            })?;

        let session = self
            .client
            .create_portal_session(CreatePortalSessionRequest {
                customer_id,
                return_url: format!("{}/subscriptions", self.app_url),
            })
            .await?;

        tracing::info!(user_id, "portal session created");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::store::test::InMemoryStore;
    use crate::billing::store::{SubscriptionRecord, SubscriptionStatus};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockPortalClient {
        requests: Mutex<Vec<CreatePortalSessionRequest>>,
    }

    #[async_trait]
    impl StripePortalClient for MockPortalClient {
        async fn create_portal_session(
            &self,
            request: CreatePortalSessionRequest,
        ) -> Result<PortalSession> {
            self.requests.lock().expect("lock").push(request);
            Ok(PortalSession {
                url: "https://billing.stripe.com/p/session/test_mock0001".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn requires_existing_customer() {
        let manager = PortalManager::new(
            InMemoryStore::new(),
            MockPortalClient::default(),
            "https://app.example.com",
        );
        let err = manager.create_session("u1").await.expect_err("no customer");
        assert!(err.to_string().contains("No active subscription"));
    }

    #[tokio::test]
    async fn creates_session_with_return_url() {
        let store = InMemoryStore::new();
        store.insert_subscription(SubscriptionRecord {
            user_id: "u1".to_string(),
            product_id: "pro-monthly".to_string(),
            stripe_subscription_id: "sub_existing001".to_string(),
            stripe_customer_id: "cus_Existing123456".to_string(),
            status: SubscriptionStatus::PastDue,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            updated_at: 0,
        });

        let manager = PortalManager::new(store, MockPortalClient::default(), "https://app.example.com");
        let session = manager.create_session("u1").await.expect("session");
        assert!(session.url.contains("billing.stripe.com"));

        let requests = manager.client.requests.lock().expect("lock");
        assert_eq!(requests[0].customer_id, "cus_Existing123456");
        assert_eq!(requests[0].return_url, "https://app.example.com/subscriptions");
    }
}
