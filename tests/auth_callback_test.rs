//! Tests for the OAuth callback endpoint: code exchange, cookie issuance,
//! and redirect clamping.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use niche_navigator::app::{DynPriceStore, DynSubscriptionStore};
use niche_navigator::auth::{AuthSession, AuthUser, MockAuthProvider};
use niche_navigator::billing::store::test::InMemoryStore;
use niche_navigator::{App, AppContext, ConfigBuilder};

const CODE: &str = "pkce-code-1234567890abcdef";
const TOKEN: &str = "issued-access-token";

fn build_router() -> Router {
    let config = ConfigBuilder::new().build().expect("config");

    let auth = MockAuthProvider::new();
    auth.add_code(
        CODE,
        AuthSession {
            access_token: TOKEN.to_string(),
            user: AuthUser {
                id: "7f8d9e0a-1b2c-4d3e-8f90-a1b2c3d4e5f6".to_string(),
                email: "user@example.com".to_string(),
            },
        },
    );

    let store = InMemoryStore::new();
    let subscriptions: DynSubscriptionStore = Arc::new(store.clone());
    let prices: DynPriceStore = Arc::new(store);
    let context = AppContext::new(config, subscriptions, prices, Arc::new(auth), None);
    App::new(context).into_test_router()
}

async fn get(router: Router, uri: &str) -> axum::response::Response {
    router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response")
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
}

#[tokio::test]
async fn valid_code_sets_session_cookie_and_redirects() {
    let response = get(build_router(), &format!("/auth/callback?code={CODE}")).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/dashboard");

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("set-cookie header");
    assert!(cookie.starts_with(&format!("sb-access-token={TOKEN}")));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
}

#[tokio::test]
async fn redirect_target_is_clamped_to_allow_list() {
    let response = get(
        build_router(),
        &format!("/auth/callback?code={CODE}&redirect_to=/subscriptions"),
    )
    .await;
    assert_eq!(location(&response), "/subscriptions");

    let response = get(
        build_router(),
        &format!("/auth/callback?code={CODE}&redirect_to=https://evil.example.com"),
    )
    .await;
    assert_eq!(location(&response), "/dashboard");
}

#[tokio::test]
async fn provider_error_redirects_to_login_without_cookie() {
    let response = get(build_router(), "/auth/callback?error=access_denied").await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/login?error=auth_failed");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn missing_or_malformed_code_redirects_to_login() {
    let response = get(build_router(), "/auth/callback").await;
    assert_eq!(location(&response), "/login?error=missing_code");

    let response = get(build_router(), "/auth/callback?code=short").await;
    assert_eq!(location(&response), "/login?error=invalid_code");
}

#[tokio::test]
async fn unknown_code_redirects_to_login() {
    let response = get(
        build_router(),
        "/auth/callback?code=pkce-code-that-was-never-issued",
    )
    .await;
    assert_eq!(location(&response), "/login?error=exchange_failed");
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}
