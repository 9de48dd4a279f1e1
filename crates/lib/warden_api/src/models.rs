//! Request and response bodies.

use serde::{Deserialize, Serialize};

/// Error body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Generic acknowledgement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    /// Token id from the reset link.
    pub id: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserRequest {
    pub id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub email: String,
}

/// `?id=` on the verification route.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenIdQuery {
    #[serde(default)]
    pub id: String,
}

/// `?email=` on resend and lookup routes.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailQuery {
    #[serde(default)]
    pub email: String,
}

/// `?code=&state=` on the OAuth callback.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// `None` when the server runs without a database (tests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_connected: Option<bool>,
}
