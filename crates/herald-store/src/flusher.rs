//! Periodic snapshot flushing.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::store::Store;

/// Flush `store` every `interval` for as long as the task runs.
///
/// The cadence is independent of message volume and connection state.
/// A failed flush is logged and simply retried on the next tick.
pub fn spawn_flush_task(store: Store, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing to flush yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.flush_if_dirty().await {
                Ok(Some(stats)) => {
                    debug!(
                        messages = stats.messages,
                        contacts = stats.contacts,
                        "periodic store flush"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "store flush failed, will retry next interval");
                }
            }
        }
    })
}
