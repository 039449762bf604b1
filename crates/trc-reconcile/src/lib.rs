//! trc-reconcile
//!
//! Pure reconciliation logic:
//! - raw source event → canonical event (normalizer)
//! - buffered source events → scenario + final status (classifier)
//! - finalize readiness per policy
//!
//! Deterministic. No IO, no clocks, no shared state.

mod classify;
mod normalizer;

use std::collections::BTreeMap;

use trc_schemas::{CanonicalEvent, FinalizePolicy, Source};

pub use classify::{classify, REASON_AMOUNTS_DIFFER, REASON_BANK_MISSING, REASON_STATUS_CONFLICT};
pub use normalizer::{amount_to_micros, normalize, ValidationError};

/// At most one canonical event per source, ordered merchant → gateway → bank.
pub type SourceEvents = BTreeMap<Source, CanonicalEvent>;

/// Fewer distinct sources than this can never establish a match or mismatch.
pub const MIN_SOURCES_FOR_FINALIZE: usize = 2;

/// Whether `events` may be finalized under `policy`.
pub fn ready_for_finalize(policy: FinalizePolicy, events: &SourceEvents) -> bool {
    if events.len() < MIN_SOURCES_FOR_FINALIZE {
        return false;
    }
    match policy {
        FinalizePolicy::BankAnchored => events.contains_key(&Source::Bank),
        FinalizePolicy::AnyTwo => true,
    }
}
