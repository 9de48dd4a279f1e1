//! Password hashing via bcrypt.
//!
//! The async wrappers move the work onto the blocking pool; bcrypt at cost
//! 10 takes tens of milliseconds and would otherwise stall the runtime.

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Hash a password with bcrypt.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::internal("bcrypt hash", e))
}

/// Verify a password against a bcrypt hash. Constant time in the hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::internal("bcrypt verify", e))
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|e| AuthError::internal("bcrypt hash task", e))?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_blocking(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::internal("bcrypt verify task", e))?
}
