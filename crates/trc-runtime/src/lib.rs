//! trc-runtime
//!
//! Stateful side of reconciliation: the correlation buffer, the coordinator
//! that drives ingest -> classify -> persist -> notify, and the notifier.
//! Pure classification lives in `trc-reconcile`; storage in `trc-db`.

pub mod buffer;
pub mod coordinator;
pub mod notify;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

pub use buffer::{BufferEntry, BufferError, Claim, CorrelationBuffer, StoreOutcome};
pub use coordinator::{build_record, Coordinator, CoordinatorError, IngestOutcome};
pub use notify::{BusMsg, Notifier};

/// Periodically drop expired buffer entries.
///
/// Expiry is already enforced lazily on every read; this only bounds memory
/// for transactions that never see another event.
pub fn spawn_buffer_janitor(buffer: Arc<CorrelationBuffer>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match buffer.purge_expired() {
                Ok(0) => {}
                Ok(n) => debug!(purged = n, "expired buffer entries dropped"),
                Err(e) => {
                    error!(error = %e, "buffer janitor stopping");
                    return;
                }
            }
        }
    })
}
