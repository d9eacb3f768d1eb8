//! HTTP route registration.

pub mod subscriptions;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::app::AppContext;
use crate::auth::auth_callback;
use subscriptions::{create_checkout, create_portal, receive_webhook};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub billing_configured: bool,
}

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        billing_configured: ctx.billing.is_some(),
    })
}

pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/auth/callback", get(auth_callback))
        .route("/api/subscriptions/checkout", post(create_checkout))
        .route("/api/subscriptions/portal", post(create_portal))
        .route("/api/subscriptions/webhook", post(receive_webhook))
}
