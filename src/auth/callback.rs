//! OAuth callback handling.
//!
//! Completes the PKCE login flow: exchanges the one-time code for a session,
//! stores the access token in an HTTP-only cookie, and redirects into the
//! app. Failures always redirect to the login page rather than rendering an
//! error, since the caller is a browser mid-flow.

use axum::extract::{Query, State};
use axum::response::Redirect;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;

use crate::app::AppContext;

const MIN_CODE_LENGTH: usize = 10;
const MAX_CODE_LENGTH: usize = 500;

/// Paths the callback is allowed to redirect into.
const ALLOWED_REDIRECTS: &[&str] = &["/", "/dashboard", "/subscriptions", "/profile", "/settings"];

const DEFAULT_REDIRECT: &str = "/dashboard";

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub redirect_to: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Clamp a requested redirect target to the allow list.
///
/// Accepts exact matches and sub-paths of allowed entries; everything else
/// (including absolute URLs and protocol-relative `//host` forms) falls back
/// to the default, which closes the open-redirect hole.
fn sanitize_redirect(requested: Option<&str>) -> &str {
    let Some(path) = requested else {
        return DEFAULT_REDIRECT;
    };

    for allowed in ALLOWED_REDIRECTS {
        if path == *allowed {
            return allowed;
        }
        if *allowed != "/" && path.starts_with(&format!("{allowed}/")) {
            return allowed;
        }
    }

    DEFAULT_REDIRECT
}

fn login_redirect(reason: &str) -> Redirect {
    Redirect::temporary(&format!("/login?error={reason}"))
}

/// GET /auth/callback
pub async fn auth_callback(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Redirect) {
    if let Some(error) = params.error {
        tracing::warn!(
            error,
            description = params.error_description.as_deref().unwrap_or(""),
            "auth callback carried a provider error"
        );
        return (jar, login_redirect("auth_failed"));
    }

    let Some(code) = params.code else {
        return (jar, login_redirect("missing_code"));
    };

    if code.len() < MIN_CODE_LENGTH || code.len() > MAX_CODE_LENGTH {
        tracing::warn!(code_len = code.len(), "auth callback code has invalid length");
        return (jar, login_redirect("invalid_code"));
    }

    let session = match ctx.auth.exchange_code(&code).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = %err, "authorization code exchange failed");
            return (jar, login_redirect("exchange_failed"));
        }
    };

    tracing::info!(user_id = %session.user.id, "login completed via auth callback");

    let cookie = Cookie::build((ctx.config.auth.cookie_name.clone(), session.access_token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(!ctx.config.dev_mode)
        .build();

    let target = sanitize_redirect(params.redirect_to.as_deref()).to_string();
    (jar.add(cookie), Redirect::temporary(&target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_allow_list_is_enforced() {
        assert_eq!(sanitize_redirect(None), "/dashboard");
        assert_eq!(sanitize_redirect(Some("/subscriptions")), "/subscriptions");
        assert_eq!(sanitize_redirect(Some("/settings/billing")), "/settings");
        assert_eq!(sanitize_redirect(Some("/")), "/");
        assert_eq!(sanitize_redirect(Some("/admin")), "/dashboard");
        assert_eq!(
            sanitize_redirect(Some("https://evil.example.com/")),
            "/dashboard"
        );
        assert_eq!(sanitize_redirect(Some("//evil.example.com")), "/dashboard");
    }
}
