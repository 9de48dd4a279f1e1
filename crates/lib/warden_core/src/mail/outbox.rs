//! Recording mailer for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{MailError, Mailer};

/// A message captured by [`Outbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

impl SentMail {
    /// The `id` query parameter of the first link in the body.
    pub fn link_token(&self) -> Option<Uuid> {
        let (_, rest) = self.html_body.split_once("?id=")?;
        let end = rest.find('"').unwrap_or(rest.len());
        Uuid::parse_str(&rest[..end]).ok()
    }
}

/// Keeps every message instead of delivering it. Can be told to fail.
#[derive(Debug, Default)]
pub struct Outbox {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<SentMail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Rejected(format!("outbox refused mail to {to}")));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                html_body: html_body.to_string(),
            });
        Ok(())
    }
}
