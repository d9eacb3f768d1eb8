//! Provider-side subscription data.
//!
//! The webhook receiver works on subscription objects in two forms: parsed
//! out of a webhook event payload, and retrieved from the provider API after
//! a completed checkout. Both normalize into [`StripeSubscriptionData`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};

/// Normalized view of a Stripe subscription object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripeSubscriptionData {
    /// Stripe subscription ID.
    pub id: String,
    /// Stripe customer ID.
    pub customer_id: String,
    /// Price ID of the first subscription item, when present.
    pub price_id: Option<String>,
    /// Subscription status string as sent by the provider.
    pub status: String,
    /// Current period start (Unix timestamp).
    pub current_period_start: Option<u64>,
    /// Current period end (Unix timestamp).
    pub current_period_end: Option<u64>,
    /// Whether the subscription cancels at period end.
    pub cancel_at_period_end: bool,
    /// Subscription metadata.
    pub metadata: HashMap<String, String>,
}

impl StripeSubscriptionData {
    /// Parse a subscription object out of a webhook event payload.
    ///
    /// `customer` arrives either as a bare ID string or as an expanded
    /// object; both forms are handled.
    pub fn from_event_object(object: &Value) -> Result<Self> {
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::validation("Subscription object missing id"))?
            .to_string();

        let customer_id = match object.get("customer") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Object(customer)) => customer
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };

        let status = object
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("canceled")
            .to_string();

        let price_id = object
            .pointer("/items/data/0/price/id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            customer_id,
            price_id,
            status,
            current_period_start: object.get("current_period_start").and_then(Value::as_u64),
            current_period_end: object.get("current_period_end").and_then(Value::as_u64),
            cancel_at_period_end: object
                .get("cancel_at_period_end")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            metadata,
        })
    }
}

/// Client capability: retrieve a subscription from the provider.
#[async_trait]
pub trait StripeSubscriptionClient: Send + Sync {
    async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData>;
}

#[async_trait]
impl<T: StripeSubscriptionClient + ?Sized> StripeSubscriptionClient for Arc<T> {
    async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData> {
        (**self).get_subscription(subscription_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_subscription_from_event_payload() {
        let object = json!({
            "id": "sub_AbCdEfGhIjKlMn",
            "customer": "cus_AbCdEfGhIjKlMn",
            "status": "active",
            "current_period_start": 1_700_000_000u64,
            "current_period_end": 1_702_592_000u64,
            "cancel_at_period_end": true,
            "items": {
                "data": [
                    {"price": {"id": "price_1OaBcDeFgHiJkLmNoPqRsTuV"}}
                ]
            },
            "metadata": {"user_id": "7f8d9e0a-1b2c-4d3e-8f90-a1b2c3d4e5f6"}
        });

        let data = StripeSubscriptionData::from_event_object(&object).expect("parse");
        assert_eq!(data.id, "sub_AbCdEfGhIjKlMn");
        assert_eq!(data.customer_id, "cus_AbCdEfGhIjKlMn");
        assert_eq!(
            data.price_id.as_deref(),
            Some("price_1OaBcDeFgHiJkLmNoPqRsTuV")
        );
        assert_eq!(data.status, "active");
        assert!(data.cancel_at_period_end);
        assert_eq!(
            data.metadata.get("user_id").map(String::as_str),
            Some("7f8d9e0a-1b2c-4d3e-8f90-a1b2c3d4e5f6")
        );
    }

    #[test]
    fn handles_expanded_customer_and_missing_fields() {
        let object = json!({
            "id": "sub_AbCdEfGhIjKlMn",
            "customer": {"id": "cus_AbCdEfGhIjKlMn", "email": "user@example.com"},
            "status": "past_due"
        });

        let data = StripeSubscriptionData::from_event_object(&object).expect("parse");
        assert_eq!(data.customer_id, "cus_AbCdEfGhIjKlMn");
        assert!(data.price_id.is_none());
        assert!(data.current_period_start.is_none());
        assert!(!data.cancel_at_period_end);
    }

    #[test]
    fn rejects_object_without_id() {
        let object = json!({"status": "active"});
        assert!(StripeSubscriptionData::from_event_object(&object).is_err());
    }
}
