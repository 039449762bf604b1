use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use trc_schemas::{FinalStatus, Scenario, Summary, TransactionRecord, VolumeBucket};

use crate::{minute_label, StoreError, TransactionStore};

#[derive(Default)]
struct Inner {
    /// Append-only, insertion order.
    rows: Vec<TransactionRecord>,
    /// transaction_id -> index into `rows`.
    by_txn: HashMap<String, usize>,
}

/// In-process store with the same append-only / unique-id semantics as the
/// Postgres table. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn create(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.by_txn.contains_key(&record.transaction_id) {
            return Err(StoreError::AlreadyFinalized {
                transaction_id: record.transaction_id.clone(),
            });
        }
        let idx = inner.rows.len();
        inner.rows.push(record.clone());
        inner.by_txn.insert(record.transaction_id.clone(), idx);
        Ok(())
    }

    async fn find(&self, transaction_id: &str) -> Result<TransactionRecord, StoreError> {
        let inner = self.inner.read().await;
        inner
            .by_txn
            .get(transaction_id)
            .map(|&i| inner.rows[i].clone())
            .ok_or_else(|| StoreError::NotFound {
                transaction_id: transaction_id.to_string(),
            })
    }

    async fn list(
        &self,
        scenario: Option<Scenario>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<(usize, &TransactionRecord)> = inner
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| scenario.map_or(true, |s| r.scenario == s))
            .collect();
        // Newest first; insertion order breaks created_at ties.
        out.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(out.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }

    async fn summary(&self) -> Result<Summary, StoreError> {
        let inner = self.inner.read().await;
        let count = |fs: FinalStatus| inner.rows.iter().filter(|r| r.final_status == fs).count() as i64;
        Ok(Summary::from_counts(
            inner.rows.len() as i64,
            count(FinalStatus::Matched),
            count(FinalStatus::Mismatch),
        ))
    }

    async fn volume_by_minute(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<VolumeBucket>, StoreError> {
        let since = now - window;
        let inner = self.inner.read().await;

        // Keyed by epoch minute so buckets sort chronologically.
        let mut buckets: BTreeMap<i64, VolumeBucket> = BTreeMap::new();
        for r in inner
            .rows
            .iter()
            .filter(|r| r.created_at >= since && r.created_at <= now)
        {
            buckets
                .entry(r.created_at.timestamp().div_euclid(60))
                .or_insert_with(|| VolumeBucket {
                    time: minute_label(r.created_at),
                    count: 0,
                })
                .count += 1;
        }
        Ok(buckets.into_values().collect())
    }
}
