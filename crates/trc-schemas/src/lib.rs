//! trc-schemas
//!
//! Wire and domain types shared by every trc crate. No logic beyond
//! string conversions lives here.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Micros scale (1e-6). All amounts are carried as integer micros.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Render integer micros as a JSON-friendly decimal number.
pub fn micros_to_f64(micros: i64) -> f64 {
    micros as f64 / MICROS_SCALE as f64
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// One of the three independent reporters of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Merchant,
    Gateway,
    Bank,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Merchant, Source::Gateway, Source::Bank];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Merchant => "merchant",
            Source::Gateway => "gateway",
            Source::Bank => "bank",
        }
    }

    /// Case-insensitive parse; surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merchant" => Some(Source::Merchant),
            "gateway" => Some(Source::Gateway),
            "bank" => Some(Source::Bank),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TxnStatus
// ---------------------------------------------------------------------------

/// Status a source reports for a transaction.
///
/// Statuses are compared for equality only, so anything outside the known
/// set is kept verbatim (already uppercased) in `Other`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TxnStatus {
    Success,
    Failed,
    Pending,
    Other(String),
}

impl TxnStatus {
    /// Build from an already trimmed + uppercased status string.
    pub fn from_normalized(s: &str) -> Self {
        match s {
            "SUCCESS" => TxnStatus::Success,
            "FAILED" => TxnStatus::Failed,
            "PENDING" => TxnStatus::Pending,
            other => TxnStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TxnStatus::Success => "SUCCESS",
            TxnStatus::Failed => "FAILED",
            TxnStatus::Pending => "PENDING",
            TxnStatus::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for TxnStatus {
    fn from(s: String) -> Self {
        TxnStatus::from_normalized(&s.trim().to_ascii_uppercase())
    }
}

impl From<TxnStatus> for String {
    fn from(s: TxnStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Scenario / FinalStatus
// ---------------------------------------------------------------------------

/// Root-cause label attached to every reconciliation outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scenario {
    PerfectMatch,
    AmountMismatch,
    StatusConflict,
    DelayedBank,
    DuplicateEvent,
    MissingEvent,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::PerfectMatch,
        Scenario::AmountMismatch,
        Scenario::StatusConflict,
        Scenario::DelayedBank,
        Scenario::DuplicateEvent,
        Scenario::MissingEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::PerfectMatch => "PERFECT_MATCH",
            Scenario::AmountMismatch => "AMOUNT_MISMATCH",
            Scenario::StatusConflict => "STATUS_CONFLICT",
            Scenario::DelayedBank => "DELAYED_BANK",
            Scenario::DuplicateEvent => "DUPLICATE_EVENT",
            Scenario::MissingEvent => "MISSING_EVENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Scenario::ALL.into_iter().find(|sc| sc.as_str() == s)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Matched,
    Mismatch,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Matched => "MATCHED",
            FinalStatus::Mismatch => "MISMATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MATCHED" => Some(FinalStatus::Matched),
            "MISMATCH" => Some(FinalStatus::Mismatch),
            _ => None,
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the coordinator may finalize a buffered transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizePolicy {
    /// At least two sources, one of which is the bank.
    #[default]
    BankAnchored,
    /// Any two distinct sources.
    AnyTwo,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Ingest payload exactly as posted by a source.
///
/// Every field is optional at this layer so a malformed payload reaches the
/// normalizer and gets a field-specific rejection. Unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub transaction_id: Option<String>,
    pub source: Option<String>,
    /// JSON number or decimal string.
    pub amount: Option<Value>,
    pub status: Option<String>,
    /// RFC 3339 string or epoch milliseconds.
    pub timestamp: Option<Value>,
    pub delayed: Option<bool>,
    pub duplicate: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    pub delayed: bool,
    pub duplicate: bool,
}

/// A validated report from one source about one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub transaction_id: String,
    pub source: Source,
    pub amount_micros: i64,
    pub status: TxnStatus,
    pub timestamp: DateTime<Utc>,
    pub flags: EventFlags,
}

/// Per-source copy stored on the persisted record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub amount_micros: i64,
    pub status: TxnStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub delayed: bool,
    #[serde(default)]
    pub duplicate: bool,
}

impl From<&CanonicalEvent> for SourceSnapshot {
    fn from(ev: &CanonicalEvent) -> Self {
        Self {
            amount_micros: ev.amount_micros,
            status: ev.status.clone(),
            timestamp: ev.timestamp,
            delayed: ev.flags.delayed,
            duplicate: ev.flags.duplicate,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes and records
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub scenario: Scenario,
    pub final_status: FinalStatus,
    pub mismatch_reason: Option<String>,
}

impl ReconciliationOutcome {
    pub fn matched(scenario: Scenario) -> Self {
        Self {
            scenario,
            final_status: FinalStatus::Matched,
            mismatch_reason: None,
        }
    }

    pub fn mismatch(scenario: Scenario, reason: impl Into<String>) -> Self {
        Self {
            scenario,
            final_status: FinalStatus::Mismatch,
            mismatch_reason: Some(reason.into()),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.final_status == FinalStatus::Matched
    }
}

/// Durable, append-only result of one finalized transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub record_id: Uuid,
    pub transaction_id: String,
    /// Taken from the merchant snapshot; 0 when the merchant never reported.
    pub amount_micros: i64,
    pub final_status: FinalStatus,
    pub scenario: Scenario,
    pub mismatch_reason: Option<String>,
    pub merchant: Option<SourceSnapshot>,
    pub gateway: Option<SourceSnapshot>,
    pub bank: Option<SourceSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn snapshot(&self, source: Source) -> Option<&SourceSnapshot> {
        match source {
            Source::Merchant => self.merchant.as_ref(),
            Source::Gateway => self.gateway.as_ref(),
            Source::Bank => self.bank.as_ref(),
        }
    }
}

/// Notification broadcast once per finalized transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationUpdate {
    pub transaction_id: String,
    pub final_status: FinalStatus,
    pub scenario: Scenario,
}

impl From<&TransactionRecord> for ReconciliationUpdate {
    fn from(r: &TransactionRecord) -> Self {
        Self {
            transaction_id: r.transaction_id.clone(),
            final_status: r.final_status,
            scenario: r.scenario,
        }
    }
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: i64,
    pub matched: i64,
    pub pending: i64,
    pub mismatch: i64,
}

impl Summary {
    /// `pending` is whatever is neither matched nor mismatched.
    pub fn from_counts(total: i64, matched: i64, mismatch: i64) -> Self {
        Self {
            total,
            matched,
            pending: total - matched - mismatch,
            mismatch,
        }
    }
}

/// Count of records created within one UTC minute (`HH:MM`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBucket {
    pub time: String,
    pub count: i64,
}
