//! Stripe webhook handling.
//!
//! Verifies webhook signatures and syncs the subscription mirror from
//! lifecycle events. Signature verification is done by hand (HMAC-SHA256
//! over `"{t}.{body}"` with constant-time comparison) rather than through
//! the SDK helper, so the receiver works on raw JSON payloads.
//!
//! Failure policy: once the signature has been verified, store read and
//! write failures are logged and the event is still acknowledged. Returning an
//! error would make the provider redeliver into the same fault and
//! eventually disable the endpoint; the provider converges the state on the
//! next lifecycle event instead.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::store::{PriceStore, SubscriptionRecord, SubscriptionStatus, SubscriptionStore, SubscriptionUpdate};
use super::subscription::{StripeSubscriptionClient, StripeSubscriptionData};
use super::validation::validate_checkout_metadata;
use crate::error::{AppError, Result};

/// Maximum age in seconds for the signed timestamp and the event itself.
const MAX_EVENT_AGE_SECS: i64 = 300;

/// A verified webhook event.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g. "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: WebhookEventData,
    /// Timestamp when the event was created at the provider.
    pub created: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEventData {
    /// The object that triggered the event.
    pub object: serde_json::Value,
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event changed local state.
    Processed,
    /// Event type not relevant to the subscription mirror.
    Ignored,
    /// Recognized event that was deliberately not applied (stale, no
    /// matching row, invalid metadata, or a logged store failure).
    Skipped,
}

/// Webhook receiver for Stripe events.
///
/// The webhook secret is held in a [`SecretString`] so it cannot leak
/// through Debug output or logs.
pub struct WebhookHandler<S, P, C>
where
    S: SubscriptionStore,
    P: PriceStore,
    C: StripeSubscriptionClient,
{
    store: S,
    prices: P,
    client: C,
    webhook_secret: SecretString,
}

impl<S, P, C> WebhookHandler<S, P, C>
where
    S: SubscriptionStore,
    P: PriceStore,
    C: StripeSubscriptionClient,
{
    #[must_use]
    pub fn new(store: S, prices: P, client: C, webhook_secret: impl Into<SecretString>) -> Self {
        Self {
            store,
            prices,
            client,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the `Stripe-Signature` header against the raw body and parse
    /// the event.
    ///
    /// Rejects signed timestamps outside a 5 minute window, signature
    /// mismatches, and events whose own `created` field is older than the
    /// same window (defense in depth against replay of captured payloads).
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        let sig_parts = parse_signature_header(signature)?;

        let now = unix_now() as i64;
        if (now - sig_parts.timestamp).abs() > MAX_EVENT_AGE_SECS {
            return Err(AppError::validation("Webhook timestamp too old"));
        }

        let signed_payload = format!(
            "{}.{}",
            sig_parts.timestamp,
            String::from_utf8_lossy(payload)
        );
        let expected_sig = compute_signature(
            self.webhook_secret.expose_secret(),
            signed_payload.as_bytes(),
        )?;

        let expected_bytes = hex::decode(&expected_sig)
            .map_err(|_| AppError::internal("Hex decode error"))?;
        let provided_bytes = hex::decode(&sig_parts.signature)
            .map_err(|_| AppError::validation("Invalid signature format"))?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(AppError::validation("Invalid webhook signature"));
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "failed to parse webhook payload");
            AppError::validation("Malformed webhook payload")
        })?;

        // The signed timestamp is the delivery time; the event's own created
        // field catches captured events re-sent under a fresh signature.
        // Same symmetric bound as the signed timestamp above.
        if (now - event.created as i64).abs() > MAX_EVENT_AGE_SECS {
            return Err(AppError::validation("Webhook event timestamp too old"));
        }

        Ok(event)
    }

    /// Process a verified webhook event.
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<WebhookOutcome> {
        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event).await?,
            "customer.subscription.updated" => self.handle_subscription_updated(&event).await?,
            "customer.subscription.deleted" => self.handle_subscription_deleted(&event).await?,
            "invoice.payment_succeeded" => {
                self.handle_invoice_event(&event, SubscriptionStatus::Active).await?
            }
            "invoice.payment_failed" => {
                self.handle_invoice_event(&event, SubscriptionStatus::PastDue).await?
            }
            other => {
                tracing::debug!(event_type = other, event_id = %event.id, "unhandled event type");
                WebhookOutcome::Ignored
            }
        };
        Ok(outcome)
    }

    /// A completed subscription-mode checkout creates (or replaces) the
    /// user's subscription row, keyed by the Stripe subscription ID.
    async fn handle_checkout_completed(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let session = &event.data.object;

        let mode = session.get("mode").and_then(serde_json::Value::as_str);
        let subscription_id = match session.get("subscription") {
            Some(serde_json::Value::String(id)) => Some(id.clone()),
            Some(serde_json::Value::Object(sub)) => sub
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            _ => None,
        };

        let (Some("subscription"), Some(subscription_id)) = (mode, subscription_id) else {
            return Ok(WebhookOutcome::Ignored);
        };

        let metadata: std::collections::HashMap<String, String> = session
            .get("metadata")
            .and_then(serde_json::Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let metadata = match validate_checkout_metadata(&metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                // Do not break webhook handling over bad metadata; the
                // purchase happened, so leave a loud trail and move on.
                tracing::error!(
                    subscription_id,
                    event_id = %event.id,
                    error = %e,
                    "webhook metadata validation failed"
                );
                return Ok(WebhookOutcome::Skipped);
            }
        };

        let subscription = self.client.get_subscription(&subscription_id).await?;

        match self.is_stale(&subscription_id, event.created).await {
            Ok(true) => return Ok(WebhookOutcome::Skipped),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    subscription_id,
                    event_id = %event.id,
                    error = %e,
                    "failed to read subscription record for ordering check"
                );
                return Ok(WebhookOutcome::Skipped);
            }
        }

        let record = SubscriptionRecord {
            user_id: metadata.user_id.clone(),
            product_id: metadata.product_id,
            stripe_subscription_id: subscription.id.clone(),
            stripe_customer_id: subscription.customer_id.clone(),
            status: SubscriptionStatus::from_stripe(&subscription.status),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            updated_at: event.created,
        };

        if let Err(e) = self.store.upsert_by_subscription_id(record).await {
            tracing::error!(
                subscription_id,
                user_id = %metadata.user_id,
                error = %e,
                "failed to create subscription record"
            );
            return Ok(WebhookOutcome::Skipped);
        }

        tracing::info!(
            subscription_id,
            user_id = %metadata.user_id,
            "subscription record created from checkout"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Status, cancellation flag and billing period follow the provider.
    /// A changed price re-resolves the product; an unknown price leaves the
    /// product unchanged and logs the miss.
    async fn handle_subscription_updated(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let subscription = StripeSubscriptionData::from_event_object(&event.data.object)?;

        let product_id = match &subscription.price_id {
            Some(price_id) => match self.prices.get_by_stripe_price_id(price_id).await {
                Ok(Some(price)) => Some(price.product_id),
                Ok(None) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        price_id,
                        "no product found for price, leaving product unchanged"
                    );
                    None
                }
                Err(e) => {
                    // Do not let a price lookup fault drop the status and
                    // period sync; leave the product as it was.
                    tracing::error!(
                        subscription_id = %subscription.id,
                        price_id,
                        error = %e,
                        "price lookup failed, leaving product unchanged"
                    );
                    None
                }
            },
            None => None,
        };

        let update = SubscriptionUpdate {
            status: Some(SubscriptionStatus::from_stripe(&subscription.status)),
            cancel_at_period_end: Some(subscription.cancel_at_period_end),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            product_id,
            updated_at: event.created,
        };

        self.apply_update(&subscription.id, event, update).await
    }

    /// Deletion is a status transition; rows are never removed.
    async fn handle_subscription_deleted(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let subscription = StripeSubscriptionData::from_event_object(&event.data.object)?;

        let update = SubscriptionUpdate {
            status: Some(SubscriptionStatus::Canceled),
            updated_at: event.created,
            ..Default::default()
        };

        self.apply_update(&subscription.id, event, update).await
    }

    /// Invoice payment events flip the status of the referenced
    /// subscription; invoices without one (one-off charges) are ignored.
    async fn handle_invoice_event(
        &self,
        event: &WebhookEvent,
        status: SubscriptionStatus,
    ) -> Result<WebhookOutcome> {
        let invoice = &event.data.object;
        let subscription_id = match invoice.get("subscription") {
            Some(serde_json::Value::String(id)) => Some(id.clone()),
            Some(serde_json::Value::Object(sub)) => sub
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            _ => None,
        };

        let Some(subscription_id) = subscription_id else {
            return Ok(WebhookOutcome::Ignored);
        };

        let update = SubscriptionUpdate {
            status: Some(status),
            updated_at: event.created,
            ..Default::default()
        };

        self.apply_update(&subscription_id, event, update).await
    }

    /// Events are delivered at-least-once and unordered. Writes stamp the
    /// row with the event's `created`; an event strictly older than the
    /// stored stamp lost the race and is skipped. Equal stamps still apply
    /// so redelivery of the winning event stays idempotent.
    async fn is_stale(&self, subscription_id: &str, event_created: u64) -> Result<bool> {
        if let Some(existing) = self.store.find_by_subscription_id(subscription_id).await? {
            if event_created < existing.updated_at {
                tracing::warn!(
                    subscription_id,
                    event_created,
                    row_updated_at = existing.updated_at,
                    "skipping stale event"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn apply_update(
        &self,
        subscription_id: &str,
        event: &WebhookEvent,
        update: SubscriptionUpdate,
    ) -> Result<WebhookOutcome> {
        match self.is_stale(subscription_id, event.created).await {
            Ok(true) => return Ok(WebhookOutcome::Skipped),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    subscription_id,
                    event_type = %event.event_type,
                    error = %e,
                    "failed to read subscription record for ordering check"
                );
                return Ok(WebhookOutcome::Skipped);
            }
        }

        match self
            .store
            .update_by_subscription_id(subscription_id, update)
            .await
        {
            Ok(true) => {
                tracing::info!(
                    subscription_id,
                    event_type = %event.event_type,
                    "subscription record updated"
                );
                Ok(WebhookOutcome::Processed)
            }
            Ok(false) => {
                tracing::warn!(
                    subscription_id,
                    event_type = %event.event_type,
                    "no subscription record matched event"
                );
                Ok(WebhookOutcome::Skipped)
            }
            Err(e) => {
                tracing::error!(
                    subscription_id,
                    event_type = %event.event_type,
                    error = %e,
                    "failed to update subscription record"
                );
                Ok(WebhookOutcome::Skipped)
            }
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parsed signature header parts.
struct SignatureParts {
    timestamp: i64,
    signature: String,
}

/// Parse the `Stripe-Signature` header (`t=...,v1=...`).
fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| AppError::validation("Invalid signature header format"))?;

        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            // Other schemes are ignored
            _ => {}
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp
            .ok_or_else(|| AppError::validation("Missing timestamp in signature"))?,
        signature: signature
            .ok_or_else(|| AppError::validation("Missing v1 signature"))?,
    })
}

/// Compute the hex-encoded HMAC-SHA256 signature.
fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::internal("HMAC error"))?;
    mac.update(payload);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Test helpers for producing valid signatures.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    /// Build a `Stripe-Signature` header value for a payload.
    pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> String {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let signature = super::compute_signature(secret, signed_payload.as_bytes())
            .expect("signature");
        format!("t={},v1={}", timestamp, signature)
    }
}
