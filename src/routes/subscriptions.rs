//! Subscription API handlers.
//!
//! All three endpoints share the same outer gating order: origin check,
//! billing availability, then (for the user-facing pair) authentication and
//! rate limiting. The webhook endpoint authenticates by signature instead
//! and is never rate limited, since the provider retries on 429 and the
//! events must land.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, State};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::app::{AppContext, BillingHandles};
use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::ratelimit::client_ip;

/// Client IP for rate-limit keying, honoring proxy headers only when the
/// deployment says to trust them.
pub struct ClientIp(pub String);

impl FromRequestParts<AppContext> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> std::result::Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip());
        Ok(Self(client_ip(
            &parts.headers,
            peer,
            state.config.rate_limit.trust_proxy,
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub price_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Reject cross-origin browser requests from unlisted origins.
///
/// Requests without an Origin header (curl, server-to-server) pass; the
/// cookie requirement still gates them.
fn enforce_origin(ctx: &AppContext, headers: &HeaderMap) -> Result<()> {
    let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };

    if ctx.config.cors.is_origin_allowed(origin) {
        Ok(())
    } else {
        tracing::warn!(origin, "request from disallowed origin");
        Err(AppError::CorsViolation)
    }
}

fn billing_handles(ctx: &AppContext) -> Result<&BillingHandles> {
    ctx.billing.as_ref().ok_or_else(|| {
        AppError::service_unavailable("Payment processing is not configured")
    })
}

async fn authenticate(ctx: &AppContext, jar: &CookieJar) -> Result<AuthUser> {
    let token = jar
        .get(&ctx.config.auth.cookie_name)
        .map(|c| c.value().to_string())
        .ok_or(AppError::AuthenticationRequired)?;

    ctx.auth
        .user_from_token(&token)
        .await?
        .ok_or(AppError::AuthenticationRequired)
}

/// Check the per-IP limit, then the per-user limit.
///
/// Both draw from the same configured budget; a request is counted against
/// both keys, so either one tripping rejects it.
async fn enforce_rate_limits(ctx: &AppContext, ip: &str, user_id: &str) -> Result<()> {
    if !ctx.config.rate_limit.enabled {
        return Ok(());
    }

    let limit = ctx.config.rate_limit.max_requests;

    let by_ip = ctx.limiter.check(limit, &format!("ip:{ip}")).await?;
    if !by_ip.allowed {
        tracing::warn!(ip, "per-IP rate limit exceeded");
        return Err(AppError::RateLimitExceeded);
    }

    let by_user = ctx.limiter.check(limit, &format!("user:{user_id}")).await?;
    if !by_user.allowed {
        tracing::warn!(user_id, "per-user rate limit exceeded");
        return Err(AppError::RateLimitExceeded);
    }

    Ok(())
}

/// POST /api/subscriptions/checkout
pub async fn create_checkout(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<Json<CheckoutResponse>> {
    enforce_origin(&ctx, &headers)?;
    let billing = billing_handles(&ctx)?;
    let user = authenticate(&ctx, &jar).await?;
    enforce_rate_limits(&ctx, &ip, &user.id).await?;

    let request: CheckoutRequest = serde_json::from_slice(&body)?;

    let session = billing
        .checkout
        .create_session(&user.id, &user.email, &request.price_id)
        .await?;

    Ok(Json(CheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}

/// POST /api/subscriptions/portal
pub async fn create_portal(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<PortalResponse>> {
    enforce_origin(&ctx, &headers)?;
    let billing = billing_handles(&ctx)?;
    let user = authenticate(&ctx, &jar).await?;
    enforce_rate_limits(&ctx, &ip, &user.id).await?;

    let session = billing.portal.create_session(&user.id).await?;

    Ok(Json(PortalResponse { url: session.url }))
}

/// POST /api/subscriptions/webhook
///
/// The raw body must reach signature verification untouched, so this takes
/// `Bytes` rather than a typed extractor.
pub async fn receive_webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let billing = billing_handles(&ctx)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::validation("Missing stripe-signature header"))?;

    let event = billing.webhook.verify_signature(&body, signature)?;
    billing.webhook.handle_event(event).await?;

    Ok(Json(WebhookAck { received: true }))
}
