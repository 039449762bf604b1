//! Reconciliation coordinator.
//!
//! Per transaction: ACCUMULATING -> FINALIZED, or ACCUMULATING -> EXPIRED
//! (implicit, via buffer TTL, no record).
//!
//! `ingest` = normalize -> buffer store -> attempt finalize.
//! `attempt_finalize` = claim -> classify -> persist -> finish + notify.
//! A failed persist releases the claim and leaves the buffered events in
//! place so the next ingest (or an explicit retry) finalizes them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use trc_config::EngineConfig;
use trc_db::{StoreError, TransactionStore};
use trc_reconcile::{classify, normalize, ValidationError};
use trc_schemas::{
    CanonicalEvent, FinalizePolicy, RawEvent, ReconciliationOutcome, ReconciliationUpdate, Source,
    SourceSnapshot, TransactionRecord,
};
use uuid::Uuid;

use crate::buffer::{BufferError, Claim, CorrelationBuffer, StoreOutcome};
use crate::notify::Notifier;

// ---------------------------------------------------------------------------
// Outcome / error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Buffered; the transaction is not ready to finalize yet.
    Accumulating { sources: usize },
    /// Same-source redelivery dropped; nothing finalized.
    DuplicateDropped,
    /// This ingest completed the transaction.
    Finalized(ReconciliationUpdate),
}

#[derive(Debug)]
pub enum CoordinatorError {
    /// Malformed raw event; nothing was buffered.
    Validation(ValidationError),
    /// Buffer unavailable; existing entries are untouched.
    Buffer(BufferError),
    /// Final record could not be written; buffer entry kept for retry.
    Persistence(StoreError),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::Validation(e) => write!(f, "invalid event: {e}"),
            CoordinatorError::Buffer(e) => write!(f, "buffer error: {e}"),
            CoordinatorError::Persistence(e) => write!(f, "finalize failed: {e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::Validation(e) => Some(e),
            CoordinatorError::Buffer(e) => Some(e),
            CoordinatorError::Persistence(e) => Some(e),
        }
    }
}

impl From<ValidationError> for CoordinatorError {
    fn from(e: ValidationError) -> Self {
        CoordinatorError::Validation(e)
    }
}

impl From<BufferError> for CoordinatorError {
    fn from(e: BufferError) -> Self {
        CoordinatorError::Buffer(e)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    buffer: Arc<CorrelationBuffer>,
    store: Arc<dyn TransactionStore>,
    notifier: Notifier,
    policy: FinalizePolicy,
}

impl Coordinator {
    pub fn new(
        buffer: Arc<CorrelationBuffer>,
        store: Arc<dyn TransactionStore>,
        notifier: Notifier,
        policy: FinalizePolicy,
    ) -> Self {
        Self {
            buffer,
            store,
            notifier,
            policy,
        }
    }

    /// Build buffer + notifier from config around an existing store.
    pub fn from_config(cfg: &EngineConfig, store: Arc<dyn TransactionStore>) -> Self {
        Self::new(
            Arc::new(CorrelationBuffer::from_config(&cfg.buffer)),
            store,
            Notifier::from_config(&cfg.notify),
            cfg.finalize.policy,
        )
    }

    pub fn buffer(&self) -> &Arc<CorrelationBuffer> {
        &self.buffer
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn policy(&self) -> FinalizePolicy {
        self.policy
    }

    /// Normalize, buffer and try to finalize one raw source event.
    pub async fn ingest(&self, raw: &RawEvent) -> Result<IngestOutcome, CoordinatorError> {
        let event = normalize(raw)?;
        self.ingest_event(event).await
    }

    /// Same as [`ingest`](Self::ingest) for an already-normalized event.
    pub async fn ingest_event(
        &self,
        event: CanonicalEvent,
    ) -> Result<IngestOutcome, CoordinatorError> {
        let txn_id = event.transaction_id.clone();
        let source = event.source;

        let stored = self.buffer.store(event)?;
        match stored {
            StoreOutcome::Inserted { sources } => {
                debug!(txn_id = %txn_id, %source, sources, "event buffered");
            }
            StoreOutcome::DuplicateDropped { .. } => {
                warn!(txn_id = %txn_id, %source, "duplicate source event dropped");
            }
        }

        // Attempted even after a dropped duplicate: a redelivery is how a
        // previously failed finalize gets retried.
        if let Some(update) = self.attempt_finalize(&txn_id).await? {
            return Ok(IngestOutcome::Finalized(update));
        }

        Ok(match stored {
            StoreOutcome::Inserted { sources } => IngestOutcome::Accumulating { sources },
            StoreOutcome::DuplicateDropped { .. } => IngestOutcome::DuplicateDropped,
        })
    }

    /// Finalize `transaction_id` if its entry is ready and unclaimed.
    ///
    /// Returns the broadcast update when this call produced the record,
    /// `None` when there was nothing (or nothing more) to do. Dropping the
    /// returned future mid-write releases the claim, so the entry stays
    /// retryable.
    pub async fn attempt_finalize(
        &self,
        transaction_id: &str,
    ) -> Result<Option<ReconciliationUpdate>, CoordinatorError> {
        let Some(claim) = self.buffer.claim(transaction_id, self.policy)? else {
            return Ok(None);
        };
        let guard = ClaimGuard::new(&self.buffer, claim);

        let sources = guard.claim.events.len();
        let outcome = classify(&guard.claim.events);
        let record = build_record(&guard.claim, &outcome, Utc::now());

        match self.store.create(&record).await {
            Ok(()) => {
                guard.finish()?;
                let update = ReconciliationUpdate::from(&record);
                let reached = self.notifier.publish(update.clone());
                info!(
                    txn_id = %record.transaction_id,
                    scenario = %record.scenario,
                    final_status = %record.final_status,
                    sources,
                    subscribers = reached,
                    "transaction finalized"
                );
                Ok(Some(update))
            }
            Err(StoreError::AlreadyFinalized { .. }) => {
                // A record already exists; the buffered copy is stale.
                guard.finish()?;
                warn!(txn_id = %transaction_id, "record already persisted; buffer entry discarded");
                Ok(None)
            }
            Err(e) => {
                guard.release()?;
                error!(txn_id = %transaction_id, error = %e, "persist failed; buffer entry kept for retry");
                Err(CoordinatorError::Persistence(e))
            }
        }
    }
}

/// Holds a finalize claim across the store write. Unless it is explicitly
/// finished or released, dropping it releases the claim.
struct ClaimGuard<'a> {
    buffer: &'a CorrelationBuffer,
    claim: Claim,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(buffer: &'a CorrelationBuffer, claim: Claim) -> Self {
        Self {
            buffer,
            claim,
            armed: true,
        }
    }

    fn finish(mut self) -> Result<bool, BufferError> {
        self.armed = false;
        self.buffer.finish(&self.claim)
    }

    fn release(mut self) -> Result<(), BufferError> {
        self.armed = false;
        self.buffer.release(&self.claim)
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.buffer.release(&self.claim) {
            Ok(()) => warn!(txn_id = %self.claim.transaction_id, "finalize abandoned mid-write; claim released"),
            Err(e) => error!(txn_id = %self.claim.transaction_id, error = %e, "finalize abandoned; claim release failed"),
        }
    }
}

/// Fold a claimed event set and its outcome into the persisted record.
/// The record amount is the merchant's; 0 when the merchant never reported.
pub fn build_record(
    claim: &Claim,
    outcome: &ReconciliationOutcome,
    created_at: DateTime<Utc>,
) -> TransactionRecord {
    let snap = |s: Source| claim.events.get(&s).map(SourceSnapshot::from);
    let merchant = snap(Source::Merchant);

    TransactionRecord {
        record_id: Uuid::new_v4(),
        transaction_id: claim.transaction_id.clone(),
        amount_micros: merchant.as_ref().map_or(0, |m| m.amount_micros),
        final_status: outcome.final_status,
        scenario: outcome.scenario,
        mismatch_reason: outcome.mismatch_reason.clone(),
        merchant,
        gateway: snap(Source::Gateway),
        bank: snap(Source::Bank),
        created_at,
    }
}
