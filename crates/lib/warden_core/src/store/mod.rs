//! Persistence seams for users, single-use tokens and the session log.
//!
//! Every method that must be race-free under concurrent callers is a single
//! call here (`consume_*`, `rotate_session`, `invalidate_session`), so the
//! adapter owns the unit of work and callers never see a check-then-act gap.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{
    EphemeralKind, EphemeralToken, NewUser, SessionTokenRecord, User, UserUpdate,
    UserWithPassword,
};

/// Unique constraint on `users.email`.
pub const USERS_EMAIL_KEY: &str = "users_email_key";
/// Unique constraint on `users.oauth_id`.
pub const USERS_OAUTH_ID_KEY: &str = "users_oauth_id_key";
/// Unique constraint on `token_log.jti`.
pub const TOKEN_LOG_JTI_KEY: &str = "token_log_jti_key";

/// Postgres SQLSTATE for unique_violation.
const PG_UNIQUE_VIOLATION: &str = "23505";

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("database error: {0}")]
    Db(sqlx::Error),
}

impl StoreError {
    /// True when the failure is a unique violation on the named constraint.
    pub fn is_unique_violation_on(&self, name: &str) -> bool {
        matches!(self, Self::UniqueViolation { constraint } if constraint == name)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db) = e.as_database_error()
            && db.code().as_deref() == Some(PG_UNIQUE_VIOLATION)
        {
            return Self::UniqueViolation {
                constraint: db.constraint().unwrap_or_default().to_string(),
            };
        }
        Self::Db(e)
    }
}

/// Outcome of consuming a single-use token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// Token deleted and the side effect applied for this user.
    Consumed { user_id: i64 },
    /// Token exists but its expiry has passed. Nothing changed.
    Expired,
    /// No such token (never issued, or already consumed).
    Missing,
}

/// Credential store: user records and password hashes.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. A duplicate email surfaces as
    /// [`StoreError::UniqueViolation`] on [`USERS_EMAIL_KEY`].
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError>;

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Like [`Self::find_user_by_email`] but also returns the password hash.
    async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Returns `None` when no user has `update.id`.
    async fn update_user(&self, update: &UserUpdate) -> Result<Option<User>, StoreError>;

    /// Deletes the user and, by cascade, their tokens and sessions.
    async fn delete_user(&self, id: i64) -> Result<bool, StoreError>;
}

/// Email verification and password reset tokens.
#[async_trait]
pub trait EphemeralTokenLedger: Send + Sync {
    async fn insert_ephemeral(
        &self,
        kind: EphemeralKind,
        token: &EphemeralToken,
    ) -> Result<(), StoreError>;

    async fn find_ephemeral(
        &self,
        kind: EphemeralKind,
        id: Uuid,
    ) -> Result<Option<EphemeralToken>, StoreError>;

    /// Atomically delete an unexpired verification token and mark its owner
    /// verified.
    async fn consume_verification(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Consumption, StoreError>;

    /// Atomically delete an unexpired reset token and store the new hash.
    async fn consume_password_reset(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> Result<Consumption, StoreError>;

    /// Delete tokens of both kinds whose expiry is at or before `now`.
    async fn purge_expired_ephemeral(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Append-only log of issued refresh tokens. Records are never deleted
/// except by the owning user's deletion, so lineage links stay true.
#[async_trait]
pub trait SessionTokenLog: Send + Sync {
    async fn insert_session(&self, record: &SessionTokenRecord) -> Result<(), StoreError>;

    async fn find_session(&self, jti: &str) -> Result<Option<SessionTokenRecord>, StoreError>;

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<SessionTokenRecord>, StoreError>;

    /// In one transaction: invalidate `old_jti` (only if still active),
    /// link it to `successor.jti`, and insert `successor`. Returns `false`
    /// and changes nothing when `old_jti` was missing or already invalidated.
    async fn rotate_session(
        &self,
        old_jti: &str,
        successor: &SessionTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Invalidate one active record, optionally recording its replacement.
    /// Returns `false` when it was missing or already invalidated.
    async fn invalidate_session(
        &self,
        jti: &str,
        replaced_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Invalidate every active record of a user. Returns how many changed.
    async fn invalidate_user_sessions(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// Everything the auth engine needs from persistence.
pub trait Store: UserStore + EphemeralTokenLedger + SessionTokenLog {}

impl<T> Store for T where T: UserStore + EphemeralTokenLedger + SessionTokenLog {}
