//! Structural request validation and the `ValidJson` and `IdPath` extractors.
//!
//! Runs before any engine call. Field rules mirror the column sizes in the
//! schema.

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use validator::ValidateEmail;

use crate::error::AppError;
use crate::models::{
    ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest, UpdateUserRequest,
};

pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 100;
pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 30;
pub const EMAIL_MAX: usize = 100;

/// Collects per-field messages and turns them into one error.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<String>);

impl FieldErrors {
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.0.push(format!("{field} is required"));
        } else if value.chars().count() > EMAIL_MAX || !looks_like_email(value) {
            self.0.push(format!("{field} must be a valid email"));
        }
        self
    }

    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.chars().count();
        if len == 0 {
            self.0.push(format!("{field} is required"));
        } else if len < min {
            self.0.push(format!("{field} must be at least {min} characters"));
        } else if len > max {
            self.0.push(format!("{field} must be at most {max} characters"));
        }
        self
    }

    pub fn finish(&mut self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(std::mem::take(&mut self.0).join("; ")))
        }
    }
}

/// RFC-shaped address whose domain has at least one dot (`local@domain.tld`).
pub fn looks_like_email(value: &str) -> bool {
    value.validate_email()
        && value
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.contains('.'))
}

/// Request bodies that can check themselves.
pub trait Validate {
    fn validate(&self) -> Result<(), AppError>;
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), AppError> {
        let mut errors = FieldErrors::default();
        errors
            .email("email", &self.email)
            .length("password", &self.password, PASSWORD_MIN, PASSWORD_MAX);
        if let Some(username) = &self.username {
            errors.length("username", username, USERNAME_MIN, USERNAME_MAX);
        }
        errors.finish()
    }
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), AppError> {
        FieldErrors::default()
            .email("email", &self.email)
            .length("password", &self.password, PASSWORD_MIN, PASSWORD_MAX)
            .finish()
    }
}

impl Validate for ForgotPasswordRequest {
    fn validate(&self) -> Result<(), AppError> {
        FieldErrors::default().email("email", &self.email).finish()
    }
}

impl Validate for ResetPasswordRequest {
    fn validate(&self) -> Result<(), AppError> {
        let mut errors = FieldErrors::default();
        if self.id.trim().is_empty() {
            errors.0.push("id is required".into());
        }
        errors
            .length("password", &self.password, PASSWORD_MIN, PASSWORD_MAX)
            .finish()
    }
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), AppError> {
        FieldErrors::default()
            .email("email", &self.email)
            .length("username", &self.username, USERNAME_MIN, USERNAME_MAX)
            .finish()
    }
}

/// JSON body that has passed [`Validate`]. Malformed JSON is a 400, not
/// axum's default 422.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                AppError::Validation(format!("Invalid input: {}", rejection.body_text()))
            })?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Numeric `{id}` path segment. A non-numeric id is a 400 JSON error rather
/// than axum's plain-text rejection.
pub struct IdPath(pub i64);

impl<S> FromRequestParts<S> for IdPath
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<i64>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                AppError::Validation(format!("Invalid path: {}", rejection.body_text()))
            })?;
        Ok(Self(id))
    }
}
