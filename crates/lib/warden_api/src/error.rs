//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use warden_core::auth::AuthError;

use crate::models::ErrorResponse;
use crate::services::oauth::OAuthError;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::ServiceUnavailable(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", m.as_str())
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            ),
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::BadRequest(msg) => AppError::BadRequest(msg),
            AuthError::Unauthorized => AppError::Unauthorized("Invalid credentials or token".into()),
            AuthError::Forbidden => AppError::Forbidden("Not allowed for this user".into()),
            AuthError::NotFound => AppError::NotFound("Resource not found".into()),
            AuthError::Conflict => AppError::Conflict("Email already exists".into()),
            AuthError::ServiceUnavailable(why) => AppError::ServiceUnavailable(why.to_string()),
            AuthError::Internal { message, source } => {
                match &source {
                    Some(cause) => tracing::error!(error = %message, cause = %cause, "internal error"),
                    None => tracing::error!(error = %message, "internal error"),
                }
                AppError::Internal(message)
            }
        }
    }
}

impl From<OAuthError> for AppError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::UnknownProvider(name) => {
                AppError::NotFound(format!("OAuth provider '{name}' is not configured"))
            }
            OAuthError::InvalidState => AppError::Unauthorized("Invalid or expired OAuth state".into()),
            OAuthError::NoVerifiedEmail => {
                AppError::Forbidden("OAuth account has no verified email".into())
            }
            other => {
                tracing::error!(error = %other, "oauth handshake failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::context::Interrupted;

    #[test]
    fn auth_errors_map_to_status_codes() {
        let cases = [
            (AuthError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AuthError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AuthError::Forbidden, StatusCode::FORBIDDEN),
            (AuthError::NotFound, StatusCode::NOT_FOUND),
            (AuthError::Conflict, StatusCode::CONFLICT),
            (
                AuthError::ServiceUnavailable(Interrupted::DeadlineExceeded),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AuthError::internal_msg("boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn internal_details_are_not_exposed() {
        let resp = AppError::from(AuthError::internal_msg("db password wrong")).into_response();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "Internal server error");
    }
}
