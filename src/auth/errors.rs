//! Auth API error taxonomy
//! Mission: Map every failure to a structured envelope without leaking internals

use crate::auth::models::Role;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Errors surfaced by the auth endpoints.
///
/// Every variant maps to a stable machine-readable code in the response
/// envelope `{success: false, error: {code, message, details?}}`.
#[derive(Debug)]
pub enum AuthApiError {
    /// Refresh token unknown, revoked, rotated away, or account inactive.
    TokenInvalid,
    /// Refresh token known but past its expiry.
    TokenExpired,
    /// No credential presented on a protected route.
    MissingToken { callback: String },
    /// Too many attempts for this identifier; retry after the given seconds.
    RateLimited { retry_after: u64 },
    InvalidInput(&'static str),
    WeakPassword,
    EmailNotVerified,
    InvalidCredentials,
    Forbidden { required: Role, current: Role },
    NotFound(&'static str),
    Internal,
}

impl AuthApiError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthApiError::TokenInvalid => "TOKEN_INVALID",
            AuthApiError::TokenExpired => "TOKEN_EXPIRED",
            AuthApiError::MissingToken { .. } => "TOKEN_INVALID",
            AuthApiError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AuthApiError::InvalidInput(_) => "INVALID_INPUT",
            AuthApiError::WeakPassword => "WEAK_PASSWORD",
            AuthApiError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AuthApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthApiError::Forbidden { .. } => "FORBIDDEN",
            AuthApiError::NotFound(_) => "NOT_FOUND",
            AuthApiError::Internal => "SERVER_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthApiError::TokenInvalid
            | AuthApiError::TokenExpired
            | AuthApiError::MissingToken { .. }
            | AuthApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthApiError::InvalidInput(_) | AuthApiError::WeakPassword => StatusCode::BAD_REQUEST,
            AuthApiError::EmailNotVerified | AuthApiError::Forbidden { .. } => {
                StatusCode::FORBIDDEN
            }
            AuthApiError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AuthApiError::TokenInvalid => "Invalid authentication token".to_string(),
            AuthApiError::TokenExpired => "Authentication token has expired".to_string(),
            AuthApiError::MissingToken { .. } => "Authentication required".to_string(),
            AuthApiError::RateLimited { retry_after } => {
                format!("Too many attempts. Retry in {retry_after} seconds")
            }
            AuthApiError::InvalidInput(msg) => (*msg).to_string(),
            AuthApiError::WeakPassword => {
                "Password must be at least 8 characters".to_string()
            }
            AuthApiError::EmailNotVerified => {
                "Email address has not been verified".to_string()
            }
            AuthApiError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthApiError::Forbidden { required, .. } => {
                format!("This action requires the {} role", required.as_str())
            }
            AuthApiError::NotFound(what) => format!("{what} not found"),
            AuthApiError::Internal => "Internal server error".to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            // The caller already holds the insufficient token, so naming both
            // roles discloses nothing they cannot infer.
            AuthApiError::Forbidden { required, current } => Some(json!({
                "requiredRole": required.as_str(),
                "currentRole": current.as_str(),
            })),
            AuthApiError::MissingToken { callback } => Some(json!({
                "callbackUrl": callback,
            })),
            AuthApiError::RateLimited { retry_after } => Some(json!({
                "retryAfter": retry_after,
            })),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AuthApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "Unexpected auth subsystem error");
        AuthApiError::Internal
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code(),
            "message": self.message(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }
        let body = Json(json!({ "success": false, "error": error }));

        match self {
            AuthApiError::RateLimited { retry_after } => (
                self.status(),
                [("Retry-After", retry_after.to_string())],
                body,
            )
                .into_response(),
            _ => (self.status(), body).into_response(),
        }
    }
}
