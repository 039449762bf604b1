//! Correlation buffer: transient per-transaction accumulation of source
//! events with first-arrival-anchored TTL.
//!
//! Every operation is a single critical section over one mutex, so
//! fetch + dedup + insert is an atomic merge and concurrent stores for the
//! same transaction never lose an update.
//!
//! Finalization is guarded by a claim: [`CorrelationBuffer::claim`] hands
//! the event set to exactly one caller. The claimant either
//! [`finish`](CorrelationBuffer::finish)es (entry removed) or
//! [`release`](CorrelationBuffer::release)s (entry kept for a retry).
//! Both compare the entry epoch, so a claim never touches an entry that
//! expired and was re-created underneath it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use trc_config::BufferConfig;
use trc_reconcile::{ready_for_finalize, SourceEvents};
use trc_schemas::{CanonicalEvent, FinalizePolicy, Source};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// A thread panicked while holding the buffer lock.
    Poisoned,
    /// `now + ttl` is not representable; the event was not stored.
    ExpiryOutOfRange,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Poisoned => write!(f, "correlation buffer unavailable (lock poisoned)"),
            BufferError::ExpiryOutOfRange => write!(f, "buffer ttl overflows the clock"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Snapshot of one transaction's buffered state.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub transaction_id: String,
    pub events: SourceEvents,
    /// Arrival of the first event; TTL and delay detection anchor here.
    pub first_seen: Instant,
    pub expires_at: Instant,
    /// Same-source redeliveries dropped by dedup.
    pub duplicates_dropped: u32,
    claimed: bool,
    epoch: u64,
}

impl BufferEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn sources(&self) -> Vec<Source> {
        self.events.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted { sources: usize },
    /// An event for this source was already buffered; the new one was dropped.
    DuplicateDropped { sources: usize },
}

/// Exclusive right to finalize one buffer entry.
#[derive(Debug, Clone)]
pub struct Claim {
    pub transaction_id: String,
    pub events: SourceEvents,
    epoch: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, BufferEntry>,
    next_epoch: u64,
}

pub struct CorrelationBuffer {
    ttl: Duration,
    delayed_bank_after: Option<Duration>,
    inner: Mutex<Inner>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl CorrelationBuffer {
    pub fn new(ttl: Duration, delayed_bank_after: Option<Duration>) -> Self {
        Self {
            ttl,
            delayed_bank_after,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn from_config(cfg: &BufferConfig) -> Self {
        Self::new(cfg.ttl(), cfg.delayed_bank_after())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, BufferError> {
        self.inner.lock().map_err(|_| BufferError::Poisoned)
    }

    /// Merge one event into its transaction's entry.
    ///
    /// - No live entry: a new one is opened with `expires_at = now + ttl`.
    /// - Source already present: the new event is dropped (first wins).
    /// - Otherwise inserted; `expires_at` is not extended.
    ///
    /// A bank event landing more than `delayed_bank_after` after the entry
    /// opened is flagged delayed.
    pub fn store(&self, event: CanonicalEvent) -> Result<StoreOutcome, BufferError> {
        let now = Instant::now();
        // Computed outside the lock: an overflow must not poison it.
        let expires_at = now
            .checked_add(self.ttl)
            .ok_or(BufferError::ExpiryOutOfRange)?;
        let mut guard = self.lock()?;
        let Inner {
            entries,
            next_epoch,
        } = &mut *guard;

        if entries
            .get(&event.transaction_id)
            .is_some_and(|e| e.is_expired(now))
        {
            debug!(txn_id = %event.transaction_id, "expired entry replaced by new window");
            entries.remove(&event.transaction_id);
        }

        let entry = entries
            .entry(event.transaction_id.clone())
            .or_insert_with(|| {
                *next_epoch += 1;
                BufferEntry {
                    transaction_id: event.transaction_id.clone(),
                    events: SourceEvents::new(),
                    first_seen: now,
                    expires_at,
                    duplicates_dropped: 0,
                    claimed: false,
                    epoch: *next_epoch,
                }
            });

        if entry.events.contains_key(&event.source) {
            entry.duplicates_dropped += 1;
            return Ok(StoreOutcome::DuplicateDropped {
                sources: entry.events.len(),
            });
        }

        let mut event = event;
        if event.source == Source::Bank && !event.flags.delayed {
            if let Some(threshold) = self.delayed_bank_after {
                if now.duration_since(entry.first_seen) > threshold {
                    event.flags.delayed = true;
                }
            }
        }

        entry.events.insert(event.source, event);
        Ok(StoreOutcome::Inserted {
            sources: entry.events.len(),
        })
    }

    /// Current entry, or `None` when absent or expired.
    pub fn get(&self, transaction_id: &str) -> Result<Option<BufferEntry>, BufferError> {
        let now = Instant::now();
        let guard = self.lock()?;
        Ok(guard
            .entries
            .get(transaction_id)
            .filter(|e| !e.is_expired(now))
            .cloned())
    }

    /// Atomically check readiness and take the finalize claim.
    ///
    /// `None` when the entry is absent, expired, already claimed, or not
    /// ready under `policy`.
    pub fn claim(
        &self,
        transaction_id: &str,
        policy: FinalizePolicy,
    ) -> Result<Option<Claim>, BufferError> {
        let now = Instant::now();
        let mut guard = self.lock()?;

        let Some(entry) = guard.entries.get_mut(transaction_id) else {
            return Ok(None);
        };
        if entry.is_expired(now) || entry.claimed || !ready_for_finalize(policy, &entry.events) {
            return Ok(None);
        }

        entry.claimed = true;
        Ok(Some(Claim {
            transaction_id: entry.transaction_id.clone(),
            events: entry.events.clone(),
            epoch: entry.epoch,
        }))
    }

    /// Remove the claimed entry after its record was persisted.
    /// Returns false if the entry is gone or belongs to a newer window.
    pub fn finish(&self, claim: &Claim) -> Result<bool, BufferError> {
        let mut guard = self.lock()?;
        let owned = guard
            .entries
            .get(&claim.transaction_id)
            .is_some_and(|e| e.epoch == claim.epoch);
        if owned {
            guard.entries.remove(&claim.transaction_id);
        }
        Ok(owned)
    }

    /// Drop the claim but keep the entry so finalization can be retried.
    pub fn release(&self, claim: &Claim) -> Result<(), BufferError> {
        let mut guard = self.lock()?;
        if let Some(e) = guard.entries.get_mut(&claim.transaction_id) {
            if e.epoch == claim.epoch {
                e.claimed = false;
            }
        }
        Ok(())
    }

    /// Unconditionally remove an entry.
    pub fn clear(&self, transaction_id: &str) -> Result<bool, BufferError> {
        Ok(self.lock()?.entries.remove(transaction_id).is_some())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, BufferError> {
        let now = Instant::now();
        let mut guard = self.lock()?;
        let before = guard.entries.len();
        guard.entries.retain(|_, e| !e.is_expired(now));
        Ok(before - guard.entries.len())
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> Result<usize, BufferError> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count())
    }

    pub fn is_empty(&self) -> Result<bool, BufferError> {
        Ok(self.len()? == 0)
    }
}
