//! Outbound email.
//!
//! The engine only knows the [`Mailer`] trait. [`smtp::SmtpMailer`] delivers
//! through an SMTP relay, [`log::LogMailer`] writes messages to the log for
//! local development, and [`outbox::Outbox`] records them for tests.

pub mod log;
pub mod outbox;
pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Mail delivery errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Sends a single HTML email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError>;
}

pub const VERIFY_EMAIL_SUBJECT: &str = "Verify Email";
pub const PASSWORD_RESET_SUBJECT: &str = "Password Reset";

/// Link a user follows to verify their address.
pub fn verification_link(base_url: &str, token: Uuid) -> String {
    format!("{base_url}/verify-email?id={token}")
}

/// Link a user follows to choose a new password.
pub fn password_reset_link(base_url: &str, token: Uuid) -> String {
    format!("{base_url}/reset-password?id={token}")
}

pub fn verification_body(link: &str) -> String {
    format!(r#"Click here to verify your email: <a href="{link}">Verify Email</a>"#)
}

pub fn password_reset_body(link: &str) -> String {
    format!(r#"Click here to reset your password: <a href="{link}">Reset Password</a>"#)
}
