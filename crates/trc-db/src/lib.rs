//! trc-db
//!
//! Durable store for finalized [`TransactionRecord`]s.
//!
//! The coordinator and the query API only see the [`TransactionStore`]
//! trait: create once, find, list, aggregate. Two implementations:
//! - [`PgStore`]: Postgres via sqlx (production)
//! - [`MemoryStore`]: in-process (daemon without a database, tests)

mod memory;
mod pg;

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use trc_schemas::{Scenario, Summary, TransactionRecord, VolumeBucket};

pub use memory::MemoryStore;
pub use pg::PgStore;

pub const ENV_DB_URL: &str = "TRC_DATABASE_URL";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record for the requested transaction id.
    NotFound { transaction_id: String },
    /// A record for this transaction id already exists (append-only guard).
    AlreadyFinalized { transaction_id: String },
    /// Writing the final record failed; nothing was persisted.
    Persistence(String),
    /// A read/aggregate query failed.
    Query(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { transaction_id } => {
                write!(f, "transaction not found: {transaction_id}")
            }
            StoreError::AlreadyFinalized { transaction_id } => {
                write!(f, "transaction already finalized: {transaction_id}")
            }
            StoreError::Persistence(msg) => write!(f, "persist failed: {msg}"),
            StoreError::Query(msg) => write!(f, "query failed: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Store boundary
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a finalized record. At most one record per transaction id;
    /// a second create returns [`StoreError::AlreadyFinalized`].
    async fn create(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    async fn find(&self, transaction_id: &str) -> Result<TransactionRecord, StoreError>;

    /// Most recent records first, optionally restricted to one scenario.
    async fn list(
        &self,
        scenario: Option<Scenario>,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn summary(&self) -> Result<Summary, StoreError>;

    /// Per-minute record counts for `[now - window, now]` (both ends
    /// inclusive), oldest first.
    async fn volume_by_minute(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<VolumeBucket>, StoreError>;
}

/// `HH:MM` label (UTC) of the minute containing `ts`.
pub fn minute_label(ts: DateTime<Utc>) -> String {
    format!("{:02}:{:02}", ts.hour(), ts.minute())
}

// ---------------------------------------------------------------------------
// Postgres lifecycle
// ---------------------------------------------------------------------------

/// Connect to Postgres using TRC_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_transactions_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='transactions'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_transactions_table: exists,
    })
}
