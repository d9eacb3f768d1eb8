//! Storage traits for subscription state.
//!
//! The service keeps a local mirror of each user's Stripe subscription,
//! synced via webhooks so request paths never call the provider. Implement
//! these traits to persist that mirror to your database; an in-memory
//! implementation is provided for testing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// Subscription status, mirroring the provider's lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Active and paid.
    Active,
    /// In trial period.
    Trialing,
    /// Payment failed, still active but past due.
    PastDue,
    /// Canceled.
    Canceled,
    /// Awaiting initial payment.
    Incomplete,
    /// Expired after incomplete payment.
    IncompleteExpired,
    /// Paused.
    Paused,
    /// Unpaid.
    Unpaid,
}

impl SubscriptionStatus {
    /// Parse from the provider's status string.
    #[must_use]
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            "unpaid" => Self::Unpaid,
            // Unknown statuses are treated as not entitled
            _ => Self::Canceled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
            Self::Unpaid => "unpaid",
        }
    }
}

/// One row of the subscription mirror.
///
/// `stripe_subscription_id` is the conflict key: every webhook-driven write
/// is keyed by it, which is what makes event redelivery converge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Owning user (uuid, from checkout session metadata).
    pub user_id: String,
    /// Internal product identifier resolved from the Stripe price.
    pub product_id: String,
    /// Stripe subscription ID (unique across rows).
    pub stripe_subscription_id: String,
    /// Stripe customer ID.
    pub stripe_customer_id: String,
    pub status: SubscriptionStatus,
    /// Current billing period start (Unix timestamp).
    pub current_period_start: Option<u64>,
    /// Current billing period end (Unix timestamp).
    pub current_period_end: Option<u64>,
    /// Whether the subscription will cancel at period end.
    pub cancel_at_period_end: bool,
    /// Timestamp of the provider event that last wrote this row.
    pub updated_at: u64,
}

impl SubscriptionRecord {
    /// Check if the subscription grants access (active or trialing).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    #[must_use]
    pub fn will_cancel(&self) -> bool {
        self.cancel_at_period_end
    }
}

/// Partial update applied to a row matched by `stripe_subscription_id`.
///
/// `None` fields are left unchanged. `updated_at` always carries the
/// timestamp of the event driving the write.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub status: Option<SubscriptionStatus>,
    pub cancel_at_period_end: Option<bool>,
    pub current_period_start: Option<u64>,
    pub current_period_end: Option<u64>,
    pub product_id: Option<String>,
    pub updated_at: u64,
}

/// A purchasable price known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceRecord {
    /// Stripe price ID (`price_...`).
    pub stripe_price_id: String,
    /// Internal product identifier this price sells.
    pub product_id: String,
    /// Display name shown in logs and admin tooling.
    pub name: String,
    pub active: bool,
}

/// Persistence for the subscription mirror.
///
/// No application-level locking: upsert-by-conflict-key is the only
/// concurrent-write mitigation, matching the provider's at-least-once
/// delivery model.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// The user's current `active`/`trialing` row, if any.
    async fn get_active_for_user(&self, user_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Any customer ID previously recorded for this user, regardless of
    /// subscription status. Used to reuse customers across checkouts.
    async fn find_customer_id_for_user(&self, user_id: &str) -> Result<Option<String>>;

    /// Look up a row by its Stripe subscription ID.
    async fn find_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>>;

    /// Insert the row, or replace the existing row with the same
    /// `stripe_subscription_id`.
    async fn upsert_by_subscription_id(&self, record: SubscriptionRecord) -> Result<()>;

    /// Apply a partial update to the row with this `stripe_subscription_id`.
    ///
    /// Returns `Ok(false)` when no row matched.
    async fn update_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<bool>;
}

/// Read access to the price catalog.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn get_by_stripe_price_id(&self, stripe_price_id: &str) -> Result<Option<PriceRecord>>;

    async fn list_active(&self) -> Result<Vec<PriceRecord>>;
}

#[async_trait]
impl<T: SubscriptionStore + ?Sized> SubscriptionStore for Arc<T> {
    async fn get_active_for_user(&self, user_id: &str) -> Result<Option<SubscriptionRecord>> {
        (**self).get_active_for_user(user_id).await
    }

    async fn find_customer_id_for_user(&self, user_id: &str) -> Result<Option<String>> {
        (**self).find_customer_id_for_user(user_id).await
    }

    async fn find_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>> {
        (**self).find_by_subscription_id(stripe_subscription_id).await
    }

    async fn upsert_by_subscription_id(&self, record: SubscriptionRecord) -> Result<()> {
        (**self).upsert_by_subscription_id(record).await
    }

    async fn update_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<bool> {
        (**self)
            .update_by_subscription_id(stripe_subscription_id, update)
            .await
    }
}

#[async_trait]
impl<T: PriceStore + ?Sized> PriceStore for Arc<T> {
    async fn get_by_stripe_price_id(&self, stripe_price_id: &str) -> Result<Option<PriceRecord>> {
        (**self).get_by_stripe_price_id(stripe_price_id).await
    }

    async fn list_active(&self) -> Result<Vec<PriceRecord>> {
        (**self).list_active().await
    }
}

/// In-memory store for testing.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// In-memory subscription mirror and price catalog.
    ///
    /// Wraps data in Arc for cheap cloning.
    #[derive(Default, Clone)]
    pub struct InMemoryStore {
        inner: Arc<InMemoryStoreInner>,
    }

    #[derive(Default)]
    struct InMemoryStoreInner {
        // Keyed by stripe_subscription_id, the conflict key
        subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
        prices: RwLock<HashMap<String, PriceRecord>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_price(&self, price: PriceRecord) {
            self.inner
                .prices
                .write()
                .expect("lock poisoned")
                .insert(price.stripe_price_id.clone(), price);
        }

        pub fn insert_subscription(&self, record: SubscriptionRecord) {
            self.inner
                .subscriptions
                .write()
                .expect("lock poisoned")
                .insert(record.stripe_subscription_id.clone(), record);
        }

        pub fn all_subscriptions(&self) -> Vec<SubscriptionRecord> {
            self.inner
                .subscriptions
                .read()
                .expect("lock poisoned")
                .values()
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl SubscriptionStore for InMemoryStore {
        async fn get_active_for_user(&self, user_id: &str) -> Result<Option<SubscriptionRecord>> {
            let subscriptions = self.inner.subscriptions.read().expect("lock poisoned");
            Ok(subscriptions
                .values()
                .find(|s| s.user_id == user_id && s.is_active())
                .cloned())
        }

        async fn find_customer_id_for_user(&self, user_id: &str) -> Result<Option<String>> {
            let subscriptions = self.inner.subscriptions.read().expect("lock poisoned");
            Ok(subscriptions
                .values()
                .find(|s| s.user_id == user_id)
                .map(|s| s.stripe_customer_id.clone()))
        }

        async fn find_by_subscription_id(
            &self,
            stripe_subscription_id: &str,
        ) -> Result<Option<SubscriptionRecord>> {
            let subscriptions = self.inner.subscriptions.read().expect("lock poisoned");
            Ok(subscriptions.get(stripe_subscription_id).cloned())
        }

        async fn upsert_by_subscription_id(&self, record: SubscriptionRecord) -> Result<()> {
            let mut subscriptions = self.inner.subscriptions.write().expect("lock poisoned");
            subscriptions.insert(record.stripe_subscription_id.clone(), record);
            Ok(())
        }

        async fn update_by_subscription_id(
            &self,
            stripe_subscription_id: &str,
            update: SubscriptionUpdate,
        ) -> Result<bool> {
            let mut subscriptions = self.inner.subscriptions.write().expect("lock poisoned");
            let Some(record) = subscriptions.get_mut(stripe_subscription_id) else {
                return Ok(false);
            };
            if let Some(status) = update.status {
                record.status = status;
            }
            if let Some(cancel) = update.cancel_at_period_end {
                record.cancel_at_period_end = cancel;
            }
            if let Some(start) = update.current_period_start {
                record.current_period_start = Some(start);
            }
            if let Some(end) = update.current_period_end {
                record.current_period_end = Some(end);
            }
            if let Some(product_id) = update.product_id {
                record.product_id = product_id;
            }
            record.updated_at = update.updated_at;
            Ok(true)
        }
    }

    #[async_trait]
    impl PriceStore for InMemoryStore {
        async fn get_by_stripe_price_id(
            &self,
            stripe_price_id: &str,
        ) -> Result<Option<PriceRecord>> {
            let prices = self.inner.prices.read().expect("lock poisoned");
            Ok(prices.get(stripe_price_id).cloned())
        }

        async fn list_active(&self) -> Result<Vec<PriceRecord>> {
            let prices = self.inner.prices.read().expect("lock poisoned");
            Ok(prices.values().filter(|p| p.active).cloned().collect())
        }
    }
}
