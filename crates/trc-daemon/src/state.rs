//! Shared runtime state for trc-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Everything here is a
//! handle (`Arc` or cheap clone); the coordinator owns the actual buffer,
//! store and notifier.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use trc_config::{EngineConfig, QueryConfig};
use trc_db::{MemoryStore, TransactionStore};
use trc_runtime::{spawn_buffer_janitor, Coordinator, Notifier};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub build: BuildInfo,
    /// Defaults for list/volume queries.
    pub query: QueryConfig,
}

impl AppState {
    pub fn new(cfg: &EngineConfig, store: Arc<dyn TransactionStore>) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::from_config(cfg, store)),
            build: BuildInfo {
                service: "trc-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            query: cfg.query.clone(),
        }
    }

    /// Default config over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(&EngineConfig::default(), Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        self.coordinator.store()
    }

    pub fn notifier(&self) -> &Notifier {
        self.coordinator.notifier()
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(notifier: Notifier, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            notifier.heartbeat(chrono::Utc::now().timestamp_millis());
        }
    })
}

/// Start the heartbeat and the buffer janitor for `state`.
pub fn spawn_background(state: &AppState, cfg: &EngineConfig) -> Vec<JoinHandle<()>> {
    vec![
        spawn_heartbeat(state.notifier().clone(), Duration::from_secs(1)),
        spawn_buffer_janitor(
            state.coordinator.buffer().clone(),
            cfg.buffer.purge_interval(),
        ),
    ]
}
