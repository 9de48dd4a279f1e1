//! Per-request deadline and cancellation.
//!
//! Every engine operation runs inside [`RequestContext::run`]. When the
//! deadline passes or the token is cancelled, the in-flight future (store
//! query, bcrypt job handle, mail send) is dropped and the caller gets an
//! [`Interrupted`] error instead of hanging.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("request timed out")]
    DeadlineExceeded,

    #[error("request cancelled")]
    Cancelled,
}

/// Deadline and cancellation signal propagated from the inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// No deadline, never cancelled (background jobs, tests).
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Expire `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie this context to an external cancellation token (e.g. server shutdown).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `fut` to completion unless the deadline or cancellation fires first.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Interrupted>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled.into()),
            _ = deadline => Err(Interrupted::DeadlineExceeded.into()),
            res = fut => res,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
