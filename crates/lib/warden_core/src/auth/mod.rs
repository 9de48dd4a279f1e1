//! Authentication and session logic.
//!
//! Password hashing, the bearer token codec, the credential & session engine
//! and the OAuth federation adapter. The HTTP crate only talks to
//! [`engine::AuthEngine`] and [`federation::Federation`].

pub mod engine;
pub mod federation;
pub mod jwt;
pub mod password;

use std::error::Error as StdError;

use thiserror::Error;

use crate::context::Interrupted;

/// Boxed cause attached to internal errors. Logged, never shown to clients.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Conflict")]
    Conflict,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(Interrupted),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl AuthError {
    /// Internal failure with a cause kept for logging.
    pub fn internal(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Internal failure with no underlying error.
    pub fn internal_msg(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }
}

impl From<Interrupted> for AuthError {
    fn from(e: Interrupted) -> Self {
        Self::ServiceUnavailable(e)
    }
}
