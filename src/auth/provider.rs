//! Authentication provider integration.
//!
//! The service does not issue its own credentials; it trusts an external
//! GoTrue-compatible identity provider. Tokens arrive as an access-token
//! cookie and are verified against the provider's user endpoint on every
//! request.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Result};

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// A session established by exchanging an authorization code.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

/// Identity provider operations.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve an access token to a user, or `None` when the token is
    /// invalid or expired.
    async fn user_from_token(&self, token: &str) -> Result<Option<AuthUser>>;

    /// Exchange a one-time authorization code for a session.
    async fn exchange_code(&self, code: &str) -> Result<AuthSession>;
}

#[async_trait]
impl<T: AuthProvider + ?Sized> AuthProvider for Arc<T> {
    async fn user_from_token(&self, token: &str) -> Result<Option<AuthUser>> {
        (**self).user_from_token(token).await
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthSession> {
        (**self).exchange_code(code).await
    }
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoTrueTokenResponse {
    access_token: String,
    user: GoTrueUser,
}

/// GoTrue-backed auth provider.
///
/// Works against any GoTrue-compatible deployment (Supabase included):
/// `GET /auth/v1/user` verifies tokens, `POST /auth/v1/token` exchanges
/// PKCE authorization codes.
#[derive(Clone)]
pub struct GoTrueAuthProvider {
    http: reqwest::Client,
    base_url: String,
    publishable_key: String,
}

impl GoTrueAuthProvider {
    #[must_use]
    pub fn new(base_url: impl Into<String>, publishable_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            publishable_key: publishable_key.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for GoTrueAuthProvider {
    async fn user_from_token(&self, token: &str) -> Result<Option<AuthUser>> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", &self.publishable_key)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "token verification rejected");
            return Ok(None);
        }

        let user: GoTrueUser = response.json().await?;
        Ok(Some(AuthUser {
            email: user.email.unwrap_or_default(),
            id: user.id,
        }))
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthSession> {
        let response = self
            .http
            .post(format!("{}/auth/v1/token?grant_type=pkce", self.base_url))
            .header("apikey", &self.publishable_key)
            .json(&serde_json::json!({ "auth_code": code }))
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "authorization code exchange failed");
            return Err(AppError::AuthenticationRequired);
        }

        let token: GoTrueTokenResponse = response.json().await?;
        Ok(AuthSession {
            access_token: token.access_token,
            user: AuthUser {
                email: token.user.email.unwrap_or_default(),
                id: token.user.id,
            },
        })
    }
}

/// Test double for the auth provider.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory provider keyed by token and code strings.
    #[derive(Default)]
    pub struct MockAuthProvider {
        tokens: Mutex<HashMap<String, AuthUser>>,
        codes: Mutex<HashMap<String, AuthSession>>,
    }

    impl MockAuthProvider {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_token(&self, token: impl Into<String>, user: AuthUser) {
            self.tokens.lock().expect("lock").insert(token.into(), user);
        }

        pub fn add_code(&self, code: impl Into<String>, session: AuthSession) {
            self.codes.lock().expect("lock").insert(code.into(), session);
        }
    }

    #[async_trait]
    impl AuthProvider for MockAuthProvider {
        async fn user_from_token(&self, token: &str) -> Result<Option<AuthUser>> {
            Ok(self.tokens.lock().expect("lock").get(token).cloned())
        }

        async fn exchange_code(&self, code: &str) -> Result<AuthSession> {
            self.codes
                .lock()
                .expect("lock")
                .get(code)
                .cloned()
                .ok_or(AppError::AuthenticationRequired)
        }
    }
}
