//! Request and response types for the trc-daemon HTTP endpoints.
//!
//! Amounts leave the service as decimal numbers (micros / 1e6). Field names
//! follow what the dashboard already consumes, hence the mix of camelCase
//! and `mismatch_reason`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trc_schemas::{micros_to_f64, FinalStatus, Scenario, SourceSnapshot, TransactionRecord};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    /// Live correlation-buffer entries.
    pub buffered: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAck {
    pub status: String,
}

impl IngestAck {
    pub fn received() -> Self {
        Self {
            status: "received".to_string(),
        }
    }
}

/// Error body for 4xx/5xx responses. `field` names the offending input when
/// a validation rule failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            field: None,
        }
    }

    pub fn with_field(error: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            field: Some(field.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// /api/reconciliation/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub scenario: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeQuery {
    pub minutes: Option<u32>,
}

/// One row of the transactions table view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub transaction_id: String,
    pub amount: f64,
    pub result: FinalStatus,
    pub scenario: Scenario,
    pub timestamp: DateTime<Utc>,
}

impl From<&TransactionRecord> for TransactionRow {
    fn from(r: &TransactionRecord) -> Self {
        Self {
            transaction_id: r.transaction_id.clone(),
            amount: micros_to_f64(r.amount_micros),
            result: r.final_status,
            scenario: r.scenario,
            timestamp: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotView {
    pub amount: f64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub delayed: bool,
    pub duplicate: bool,
}

impl From<&SourceSnapshot> for SnapshotView {
    fn from(s: &SourceSnapshot) -> Self {
        Self {
            amount: micros_to_f64(s.amount_micros),
            status: s.status.as_str().to_string(),
            timestamp: s.timestamp,
            delayed: s.delayed,
            duplicate: s.duplicate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetail {
    pub transaction_id: String,
    pub amount: f64,
    pub result: FinalStatus,
    pub scenario: Scenario,
    #[serde(rename = "mismatch_reason")]
    pub mismatch_reason: Option<String>,
    pub merchant: Option<SnapshotView>,
    pub gateway: Option<SnapshotView>,
    pub bank: Option<SnapshotView>,
    pub created_at: DateTime<Utc>,
}

impl From<&TransactionRecord> for TransactionDetail {
    fn from(r: &TransactionRecord) -> Self {
        Self {
            transaction_id: r.transaction_id.clone(),
            amount: micros_to_f64(r.amount_micros),
            result: r.final_status,
            scenario: r.scenario,
            mismatch_reason: r.mismatch_reason.clone(),
            merchant: r.merchant.as_ref().map(SnapshotView::from),
            gateway: r.gateway.as_ref().map(SnapshotView::from),
            bank: r.bank.as_ref().map(SnapshotView::from),
            created_at: r.created_at,
        }
    }
}
