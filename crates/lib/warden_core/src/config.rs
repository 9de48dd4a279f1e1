//! Authentication configuration.
//!
//! Built once at process start and handed to [`crate::auth::jwt::TokenCodec`]
//! and [`crate::auth::engine::AuthEngine`]. Nothing in this crate reads the
//! environment directly.

use std::fmt;

use chrono::Duration;
use thiserror::Error;

use crate::auth::password::DEFAULT_BCRYPT_COST;

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// Email verification link lifetime: 1 hour.
pub const VERIFY_EMAIL_EXPIRY_SECS: i64 = 60 * 60;

/// Password reset link lifetime: 15 minutes.
pub const PASSWORD_RESET_EXPIRY_SECS: i64 = 15 * 60;

/// Configuration errors detected at start-up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("access and refresh secrets must differ")]
    SharedSecret,

    #[error("bcrypt cost {0} is outside 4..=31")]
    BcryptCost(u32),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Secrets, lifetimes and hashing parameters for the auth engine.
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret for access tokens.
    pub access_secret: String,
    /// HMAC secret for refresh tokens. Must differ from `access_secret`.
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub verify_email_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub bcrypt_cost: u32,
    /// Public URL used to build links in outgoing emails.
    pub base_url: String,
}

impl AuthConfig {
    /// Config with default lifetimes and bcrypt cost.
    pub fn new(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl: Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS),
            refresh_ttl: Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS),
            verify_email_ttl: Duration::seconds(VERIFY_EMAIL_EXPIRY_SECS),
            password_reset_ttl: Duration::seconds(PASSWORD_RESET_EXPIRY_SECS),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Reject configurations that would weaken token separation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::Missing("JWT_ACCESS_SECRET"));
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::Missing("JWT_REFRESH_SECRET"));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::SharedSecret);
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::BcryptCost(self.bcrypt_cost));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("verify_email_ttl", &self.verify_email_ttl)
            .field("password_reset_ttl", &self.password_reset_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("base_url", &self.base_url)
            .finish()
    }
}
