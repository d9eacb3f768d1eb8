//! PostgREST-backed subscription store.
//!
//! Talks to a PostgREST-compatible data API (Supabase's is one) over HTTP
//! with the service key, which bypasses row-level security. Tables:
//! `subscriptions` (conflict key `stripe_subscription_id`) and `prices`.

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::store::{
    PriceRecord, PriceStore, SubscriptionRecord, SubscriptionStore, SubscriptionUpdate,
};
use crate::error::{AppError, Result};

pub struct PostgrestStore {
    http: reqwest::Client,
    base_url: String,
    service_key: SecretString,
}

impl PostgrestStore {
    #[must_use]
    pub fn new(rest_url: impl Into<String>, service_key: SecretString) -> Self {
        let base = rest_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{base}/rest/v1"),
            service_key,
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", self.service_key.expose_secret())
            .bearer_auth(self.service_key.expose_secret())
    }

    async fn read_rows<T: DeserializeOwned>(response: reqwest::Response) -> Result<Vec<T>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::database(format!(
                "data API returned {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|err| AppError::database(format!("data API response malformed: {err}")))
    }

    async fn expect_success(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AppError::database(format!(
                "data API returned {status}: {body}"
            )))
        }
    }
}

impl std::fmt::Debug for PostgrestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Build the PATCH body for a partial update, omitting unset fields so
/// PostgREST leaves those columns alone.
fn update_body(update: &SubscriptionUpdate) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if let Some(status) = update.status {
        body.insert("status".into(), status.as_str().into());
    }
    if let Some(cancel) = update.cancel_at_period_end {
        body.insert("cancel_at_period_end".into(), cancel.into());
    }
    if let Some(start) = update.current_period_start {
        body.insert("current_period_start".into(), start.into());
    }
    if let Some(end) = update.current_period_end {
        body.insert("current_period_end".into(), end.into());
    }
    if let Some(product_id) = &update.product_id {
        body.insert("product_id".into(), product_id.as_str().into());
    }
    body.insert("updated_at".into(), update.updated_at.into());
    serde_json::Value::Object(body)
}

#[async_trait]
impl SubscriptionStore for PostgrestStore {
    async fn get_active_for_user(&self, user_id: &str) -> Result<Option<SubscriptionRecord>> {
        let response = self
            .request(reqwest::Method::GET, "subscriptions")
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("status", "in.(active,trialing)".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let mut rows: Vec<SubscriptionRecord> = Self::read_rows(response).await?;
        Ok(rows.pop())
    }

    async fn find_customer_id_for_user(&self, user_id: &str) -> Result<Option<String>> {
        #[derive(serde::Deserialize)]
        struct CustomerRow {
            stripe_customer_id: String,
        }

        let response = self
            .request(reqwest::Method::GET, "subscriptions")
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("select", "stripe_customer_id".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let mut rows: Vec<CustomerRow> = Self::read_rows(response).await?;
        Ok(rows.pop().map(|r| r.stripe_customer_id))
    }

    async fn find_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>> {
        let response = self
            .request(reqwest::Method::GET, "subscriptions")
            .query(&[
                (
                    "stripe_subscription_id",
                    format!("eq.{stripe_subscription_id}"),
                ),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let mut rows: Vec<SubscriptionRecord> = Self::read_rows(response).await?;
        Ok(rows.pop())
    }

    async fn upsert_by_subscription_id(&self, record: SubscriptionRecord) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "subscriptions")
            .query(&[("on_conflict", "stripe_subscription_id")])
            .header(
                "prefer",
                HeaderValue::from_static("resolution=merge-duplicates,return=minimal"),
            )
            .json(&record)
            .send()
            .await?;

        Self::expect_success(response).await
    }

    async fn update_by_subscription_id(
        &self,
        stripe_subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<bool> {
        let response = self
            .request(reqwest::Method::PATCH, "subscriptions")
            .query(&[(
                "stripe_subscription_id",
                format!("eq.{stripe_subscription_id}"),
            )])
            .header("prefer", HeaderValue::from_static("return=representation"))
            .json(&update_body(&update))
            .send()
            .await?;

        let rows: Vec<serde_json::Value> = Self::read_rows(response).await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl PriceStore for PostgrestStore {
    async fn get_by_stripe_price_id(&self, stripe_price_id: &str) -> Result<Option<PriceRecord>> {
        let response = self
            .request(reqwest::Method::GET, "prices")
            .query(&[
                ("stripe_price_id", format!("eq.{stripe_price_id}")),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let mut rows: Vec<PriceRecord> = Self::read_rows(response).await?;
        Ok(rows.pop())
    }

    async fn list_active(&self) -> Result<Vec<PriceRecord>> {
        let response = self
            .request(reqwest::Method::GET, "prices")
            .query(&[("active", "is.true")])
            .send()
            .await?;

        Self::read_rows(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::store::SubscriptionStatus;

    #[test]
    fn update_body_omits_unset_fields() {
        let body = update_body(&SubscriptionUpdate {
            status: Some(SubscriptionStatus::PastDue),
            updated_at: 1_700_000_000,
            ..Default::default()
        });

        assert_eq!(body["status"], "past_due");
        assert_eq!(body["updated_at"], 1_700_000_000u64);
        assert!(body.get("cancel_at_period_end").is_none());
        assert!(body.get("product_id").is_none());
    }

    #[test]
    fn update_body_carries_all_set_fields() {
        let body = update_body(&SubscriptionUpdate {
            status: Some(SubscriptionStatus::Active),
            cancel_at_period_end: Some(true),
            current_period_start: Some(1),
            current_period_end: Some(2),
            product_id: Some("pro-monthly".to_string()),
            updated_at: 3,
        });

        assert_eq!(body["cancel_at_period_end"], true);
        assert_eq!(body["product_id"], "pro-monthly");
        assert_eq!(body["current_period_end"], 2);
    }

    #[test]
    fn debug_output_hides_service_key() {
        let store = PostgrestStore::new(
            "https://db.example.com",
            SecretString::from("service-role-key-secret"),
        );
        let debug = format!("{store:?}");
        assert!(!debug.contains("service-role-key-secret"));
        assert!(debug.contains("rest/v1"));
    }
}
