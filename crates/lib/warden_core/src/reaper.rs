//! Periodic purge of expired single-use tokens.
//!
//! The session log is append-only and is never swept here.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::store::{Store, StoreError};

/// Default time between sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Run a single sweep. Returns the number of ephemeral tokens removed.
pub async fn reap_once(store: &dyn Store, clock: &dyn Clock) -> Result<u64, StoreError> {
    store.purge_expired_ephemeral(clock.now()).await
}

/// Sweep every `interval` until `cancel` fires.
pub fn spawn_reaper(
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reaper stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            match reap_once(store.as_ref(), clock.as_ref()).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "purged expired tokens"),
                Err(e) => warn!(error = %e, "token purge failed"),
            }
        }
    })
}
