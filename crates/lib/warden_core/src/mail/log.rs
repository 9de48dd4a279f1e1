//! Mailer that writes messages to the log instead of sending them.

use async_trait::async_trait;
use tracing::info;

use super::{MailError, Mailer};

/// Development mailer, used when no SMTP relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        info!(to, subject, body = html_body, "email not sent (no SMTP relay configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds() {
        assert!(LogMailer.send("a@example.com", "s", "b").await.is_ok());
    }
}
