//! Authentication domain models.
//!
//! These are internal domain models, distinct from the request/response
//! types the HTTP layer serialises.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub oauth_id: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
    pub email: String,
    pub is_verified: bool,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User with password hash (for internal auth flows only; never serialised).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserWithPassword {
    #[sqlx(flatten)]
    pub user: User,
    /// `None` for OAuth-only accounts.
    pub password_hash: Option<String>,
}

/// Insert payload for a new user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub oauth_id: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
    pub email: String,
    pub password_hash: Option<String>,
    pub is_verified: bool,
    pub provider: Option<String>,
}

/// Profile fields a user may change about themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdate {
    pub id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub email: String,
}

/// Which single-use workflow an ephemeral token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EphemeralKind {
    Verification,
    PasswordReset,
}

impl EphemeralKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// A pending email verification or password reset.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EphemeralToken {
    pub id: Uuid,
    pub user_id: i64,
    pub email: String,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EphemeralToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expired_at
    }
}

/// One issued refresh token in the session log.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SessionTokenRecord {
    pub id: Uuid,
    pub user_id: i64,
    pub jti: String,
    /// jti this token was rotated from; `None` when issued at login.
    pub refreshed_from_jti: Option<String>,
    /// jti that replaced this token on rotation.
    pub replaced_by_jti: Option<String>,
    /// Set once, never cleared.
    pub invalidated_at: Option<DateTime<Utc>>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
}

impl SessionTokenRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.invalidated_at.is_none() && now < self.expired_at
    }
}

/// Where a session request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Bearer token flavour. Each kind has its own secret and lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

/// Identity embedded into every bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: i64,
    pub username: String,
    pub email: String,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

impl From<&TokenClaims> for TokenSubject {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username.clone(),
            email: claims.email.clone(),
        }
    }
}

/// JWT claims embedded in access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id.
    #[serde(rename = "id")]
    pub user_id: i64,
    pub username: String,
    pub email: String,
    /// Unique token id, the revocation key for refresh tokens.
    pub jti: String,
    /// Token kind.
    pub typ: TokenKind,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// Freshly issued access/refresh pair.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Identity asserted by an external OAuth provider after its own handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub provider: String,
    pub external_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}
