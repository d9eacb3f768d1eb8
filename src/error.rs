use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The main error type for the billing service.
///
/// Variants map to the error codes surfaced to API clients. Messages for
/// client errors (4xx) are considered safe to return verbatim; server errors
/// (5xx) are replaced with a generic message in responses and logged in full
/// server-side.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("You do not have permission to access this resource")]
    AuthorizationFailed,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests")]
    RateLimitExceeded,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Origin not allowed")]
    CorsViolation,

    #[error("Billing provider error: {0}")]
    BillingProvider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Standard error response format for API errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub error_id: String,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn billing_provider(msg: impl Into<String>) -> Self {
        Self::BillingProvider(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Machine-readable error code included in every error response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::AuthorizationFailed => "AUTHORIZATION_FAILED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::CorsViolation => "CORS_VIOLATION",
            Self::BillingProvider(_) => "STRIPE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) | Self::Anyhow(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AuthorizationFailed | Self::CorsViolation => StatusCode::FORBIDDEN,
            Self::Validation(_) | Self::BillingProvider(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal(_) | Self::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a safe error message suitable for client responses.
    ///
    /// Client errors (4xx) keep their message since it is actionable for the
    /// caller. Server errors (5xx) collapse to a generic message to prevent
    /// information disclosure (CWE-209); the full error is logged server-side.
    pub fn safe_message(&self) -> String {
        if self.status_code().is_server_error() {
            "An unexpected error occurred. Please try again later.".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "request failed"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "request rejected"
            );
        }

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            code: self.code(),
            error_id,
        });

        if status == StatusCode::TOO_MANY_REQUESTS {
            (status, [("retry-after", "60")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON payload: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Internal(format!("Upstream request failed: {err}"))
    }
}

impl From<stripe::StripeError> for AppError {
    fn from(err: stripe::StripeError) -> Self {
        Self::BillingProvider(err.to_string())
    }
}

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::AuthenticationRequired.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::validation("bad price").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::RateLimitExceeded.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::service_unavailable("billing not configured").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::CorsViolation.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn server_errors_are_sanitized() {
        let err = AppError::database("connection refused to 10.0.0.5:5432");
        assert!(!err.safe_message().contains("10.0.0.5"));

        let err = AppError::validation("price_id must match the expected format");
        assert!(err.safe_message().contains("price_id"));
    }

    #[tokio::test]
    async fn response_body_carries_code_and_error_id() {
        let response = AppError::validation("priceId is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert!(json["error_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn rate_limit_response_sets_retry_after() {
        let response = AppError::RateLimitExceeded.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("retry-after").map(|v| v.as_bytes()),
            Some(&b"60"[..])
        );
    }
}
