use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use trc_schemas::{
    FinalStatus, Scenario, SourceSnapshot, Summary, TransactionRecord, VolumeBucket,
};
use uuid::Uuid;

use crate::{StoreError, TransactionStore};

const SELECT_COLUMNS: &str = r#"
    record_id, txn_id, amount_micros, final_status, scenario, mismatch_reason,
    merchant, gateway, bank, created_at
"#;

/// Postgres-backed store over the `transactions` table.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool; waits for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn snapshot_to_json(s: &Option<SourceSnapshot>) -> Result<Option<Value>, StoreError> {
    s.as_ref()
        .map(|snap| {
            serde_json::to_value(snap).map_err(|e| StoreError::Persistence(e.to_string()))
        })
        .transpose()
}

fn snapshot_from_json(v: Option<Value>) -> Result<Option<SourceSnapshot>, StoreError> {
    v.map(|json| {
        serde_json::from_value(json).map_err(|e| StoreError::Query(format!("bad snapshot: {e}")))
    })
    .transpose()
}

fn record_from_row(row: &PgRow) -> Result<TransactionRecord, StoreError> {
    let q = |e: sqlx::Error| StoreError::Query(e.to_string());

    let final_status: String = row.try_get("final_status").map_err(q)?;
    let scenario: String = row.try_get("scenario").map_err(q)?;

    Ok(TransactionRecord {
        record_id: row.try_get::<Uuid, _>("record_id").map_err(q)?,
        transaction_id: row.try_get("txn_id").map_err(q)?,
        amount_micros: row.try_get("amount_micros").map_err(q)?,
        final_status: FinalStatus::parse(&final_status)
            .ok_or_else(|| StoreError::Query(format!("invalid final_status: {final_status}")))?,
        scenario: Scenario::parse(&scenario)
            .ok_or_else(|| StoreError::Query(format!("invalid scenario: {scenario}")))?,
        mismatch_reason: row.try_get("mismatch_reason").map_err(q)?,
        merchant: snapshot_from_json(row.try_get("merchant").map_err(q)?)?,
        gateway: snapshot_from_json(row.try_get("gateway").map_err(q)?)?,
        bank: snapshot_from_json(row.try_get("bank").map_err(q)?)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(q)?,
    })
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn create(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            insert into transactions (
              record_id, txn_id, amount_micros, final_status, scenario, mismatch_reason,
              merchant, gateway, bank, created_at
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            on conflict (txn_id) do nothing
            "#,
        )
        .bind(record.record_id)
        .bind(&record.transaction_id)
        .bind(record.amount_micros)
        .bind(record.final_status.as_str())
        .bind(record.scenario.as_str())
        .bind(&record.mismatch_reason)
        .bind(snapshot_to_json(&record.merchant)?)
        .bind(snapshot_to_json(&record.gateway)?)
        .bind(snapshot_to_json(&record.bank)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Persistence(e.to_string()))?;

        if res.rows_affected() == 0 {
            debug!(txn_id = %record.transaction_id, "insert skipped: txn_id already present");
            return Err(StoreError::AlreadyFinalized {
                transaction_id: record.transaction_id.clone(),
            });
        }
        Ok(())
    }

    async fn find(&self, transaction_id: &str) -> Result<TransactionRecord, StoreError> {
        let row = sqlx::query(&format!(
            "select {SELECT_COLUMNS} from transactions where txn_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        match row {
            Some(r) => record_from_row(&r),
            None => Err(StoreError::NotFound {
                transaction_id: transaction_id.to_string(),
            }),
        }
    }

    async fn list(
        &self,
        scenario: Option<Scenario>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r#"
            select {SELECT_COLUMNS}
            from transactions
            where ($1::text is null or scenario = $1)
            order by created_at desc, record_id desc
            limit $2
            "#
        ))
        .bind(scenario.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn summary(&self) -> Result<Summary, StoreError> {
        let (total, matched, mismatch): (i64, i64, i64) = sqlx::query_as(
            r#"
            select
              count(*)::bigint,
              count(*) filter (where final_status = 'MATCHED')::bigint,
              count(*) filter (where final_status = 'MISMATCH')::bigint
            from transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(Summary::from_counts(total, matched, mismatch))
    }

    async fn volume_by_minute(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<VolumeBucket>, StoreError> {
        let since = now - window;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            select
              to_char(date_trunc('minute', created_at at time zone 'UTC'), 'HH24:MI') as time,
              count(*)::bigint as count
            from transactions
            where created_at >= $1 and created_at <= $2
            group by date_trunc('minute', created_at at time zone 'UTC')
            order by date_trunc('minute', created_at at time zone 'UTC') asc
            "#,
        )
        .bind(since)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(time, count)| VolumeBucket { time, count })
            .collect())
    }
}
