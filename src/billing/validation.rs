//! Input validation for billing operations.
//!
//! Stripe IDs arrive from clients (checkout requests) and from webhook
//! payloads; validating their shape up front prevents malformed data from
//! reaching the provider API or the subscription mirror.

use std::collections::HashMap;

use crate::error::{AppError, Result};

/// Checkout session metadata required to attribute a subscription to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    /// Auth user UUID.
    pub user_id: String,
    /// Internal product identifier.
    pub product_id: String,
}

fn has_id_shape(id: &str, prefix: &str, min_suffix: usize) -> bool {
    match id.strip_prefix(prefix) {
        Some(suffix) => {
            suffix.len() >= min_suffix && suffix.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Validate a Stripe price ID (`price_` + at least 24 alphanumerics).
pub fn validate_price_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(AppError::validation("Price ID is required"));
    }
    if !has_id_shape(id, "price_", 24) {
        return Err(AppError::validation("Invalid Stripe price ID format"));
    }
    Ok(())
}

/// Validate a Stripe customer ID (`cus_` + at least 14 alphanumerics).
pub fn validate_customer_id(id: &str) -> Result<()> {
    if !has_id_shape(id, "cus_", 14) {
        return Err(AppError::validation("Invalid Stripe customer ID format"));
    }
    Ok(())
}

/// Validate a Stripe subscription ID (`sub_` + at least 14 alphanumerics).
pub fn validate_subscription_id(id: &str) -> Result<()> {
    if !has_id_shape(id, "sub_", 14) {
        return Err(AppError::validation("Invalid Stripe subscription ID format"));
    }
    Ok(())
}

/// Validate checkout session metadata from a webhook payload.
///
/// `user_id` must be a UUID and `product_id` non-empty. The webhook handler
/// treats a failure here as log-and-skip rather than an error response.
pub fn validate_checkout_metadata(metadata: &HashMap<String, String>) -> Result<CheckoutMetadata> {
    let user_id = metadata
        .get("user_id")
        .ok_or_else(|| AppError::validation("Missing user_id in session metadata"))?;
    uuid::Uuid::parse_str(user_id)
        .map_err(|_| AppError::validation("Invalid user ID format in session metadata"))?;

    let product_id = metadata
        .get("product_id")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("Missing product_id in session metadata"))?;

    Ok(CheckoutMetadata {
        user_id: user_id.clone(),
        product_id: product_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_price_id() {
        assert!(validate_price_id("price_1OaBcDeFgHiJkLmNoPqRsTuV").is_ok());
    }

    #[test]
    fn rejects_short_or_malformed_price_ids() {
        assert!(validate_price_id("").is_err());
        assert!(validate_price_id("price_short").is_err());
        assert!(validate_price_id("prod_1OaBcDeFgHiJkLmNoPqRsTuV").is_err());
        assert!(validate_price_id("price_1OaBcDeFgHiJkLmNoPqR;DROP").is_err());
    }

    #[test]
    fn customer_and_subscription_id_shapes() {
        assert!(validate_customer_id("cus_AbCdEfGhIjKlMn").is_ok());
        assert!(validate_customer_id("cus_short").is_err());
        assert!(validate_subscription_id("sub_AbCdEfGhIjKlMn").is_ok());
        assert!(validate_subscription_id("cus_AbCdEfGhIjKlMn").is_err());
    }

    #[test]
    fn metadata_requires_uuid_user_and_nonempty_product() {
        let mut metadata = HashMap::new();
        metadata.insert(
            "user_id".to_string(),
            "7f8d9e0a-1b2c-4d3e-8f90-a1b2c3d4e5f6".to_string(),
        );
        metadata.insert("product_id".to_string(), "pro-monthly".to_string());
        let parsed = validate_checkout_metadata(&metadata).expect("valid metadata");
        assert_eq!(parsed.product_id, "pro-monthly");

        metadata.insert("user_id".to_string(), "not-a-uuid".to_string());
        assert!(validate_checkout_metadata(&metadata).is_err());

        metadata.insert(
            "user_id".to_string(),
            "7f8d9e0a-1b2c-4d3e-8f90-a1b2c3d4e5f6".to_string(),
        );
        metadata.insert("product_id".to_string(), String::new());
        assert!(validate_checkout_metadata(&metadata).is_err());

        metadata.remove("product_id");
        assert!(validate_checkout_metadata(&metadata).is_err());
    }
}
