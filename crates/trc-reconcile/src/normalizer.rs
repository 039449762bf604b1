//! Canonical normalization of raw source events.
//!
//! Converts a [`RawEvent`] (as posted by merchant, gateway or bank) into a
//! [`CanonicalEvent`] with integer-micro amount, uppercased status and a
//! UTC timestamp. Every missing or malformed field is a [`ValidationError`];
//! nothing is coerced silently.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use trc_schemas::{CanonicalEvent, EventFlags, RawEvent, Source, TxnStatus, MICROS_SCALE};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Why a raw event was rejected before buffering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was absent (or blank).
    MissingField { field: &'static str },
    /// `source` is not one of merchant / gateway / bank.
    UnknownSource { raw: String },
    /// `amount` is not a plain non-negative decimal.
    InvalidAmount { raw: String },
    /// `amount` has more than 6 decimal places (ambiguous micro conversion).
    TooManyDecimalPlaces { raw: String },
    /// `timestamp` is neither RFC 3339 nor epoch milliseconds.
    InvalidTimestamp { raw: String },
}

impl ValidationError {
    /// Name of the offending field, surfaced to ingest callers.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField { field } => field,
            ValidationError::UnknownSource { .. } => "source",
            ValidationError::InvalidAmount { .. }
            | ValidationError::TooManyDecimalPlaces { .. } => "amount",
            ValidationError::InvalidTimestamp { .. } => "timestamp",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField { field } => {
                write!(f, "required field '{field}' is missing")
            }
            ValidationError::UnknownSource { raw } => {
                write!(
                    f,
                    "unknown source '{raw}' (expected merchant, gateway or bank)"
                )
            }
            ValidationError::InvalidAmount { raw } => {
                write!(f, "amount could not be parsed as a decimal: '{raw}'")
            }
            ValidationError::TooManyDecimalPlaces { raw } => {
                write!(
                    f,
                    "amount has more than 6 decimal places \
                     (ambiguous micro conversion): '{raw}'"
                )
            }
            ValidationError::InvalidTimestamp { raw } => {
                write!(f, "timestamp could not be parsed: '{raw}'")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Amount conversion
// ---------------------------------------------------------------------------

/// Convert a JSON amount (number or decimal string) to integer micros.
///
/// Rules:
/// - Digits with an optional single `.` fractional part; optional leading `+`.
/// - At most 6 decimal places.
/// - Negative values, exponents, empty strings and anything non-numeric are
///   rejected.
/// - No floating-point arithmetic is performed.
pub fn amount_to_micros(v: &Value) -> Result<i64, ValidationError> {
    let text = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            return Err(ValidationError::InvalidAmount {
                raw: other.to_string(),
            })
        }
    };
    decimal_to_micros(&text)
}

fn decimal_to_micros(raw: &str) -> Result<i64, ValidationError> {
    let invalid = || ValidationError::InvalidAmount {
        raw: raw.to_string(),
    };

    let s = raw.trim();
    let digits = s.strip_prefix('+').unwrap_or(s);
    if digits.is_empty() {
        return Err(invalid());
    }

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }

    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid());
    }

    if frac_part.len() > 6 {
        return Err(ValidationError::TooManyDecimalPlaces {
            raw: raw.to_string(),
        });
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse::<i64>().map_err(|_| invalid())?
    };

    let frac_val: i64 = if frac_part.is_empty() {
        0
    } else {
        format!("{frac_part:0<6}")
            .parse::<i64>()
            .map_err(|_| invalid())?
    };

    int_val
        .checked_mul(MICROS_SCALE)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(invalid)
}

// ---------------------------------------------------------------------------
// Timestamp conversion
// ---------------------------------------------------------------------------

fn parse_timestamp(v: &Value) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = || ValidationError::InvalidTimestamp { raw: v.to_string() };

    match v {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            // Offset-less ISO-8601 is taken as UTC.
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
                .map_err(|_| invalid())
        }
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(invalid)?;
            Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn required_str<'a>(
    v: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match v.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ValidationError::MissingField { field }),
    }
}

/// Normalize a single [`RawEvent`] into a [`CanonicalEvent`].
pub fn normalize(raw: &RawEvent) -> Result<CanonicalEvent, ValidationError> {
    let transaction_id = required_str(&raw.transaction_id, "transaction_id")?;

    let source_raw = required_str(&raw.source, "source")?;
    let source = Source::parse(source_raw).ok_or_else(|| ValidationError::UnknownSource {
        raw: source_raw.to_string(),
    })?;

    let amount = raw
        .amount
        .as_ref()
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingField { field: "amount" })?;
    let amount_micros = amount_to_micros(amount)?;

    let status = required_str(&raw.status, "status")?.to_ascii_uppercase();

    let timestamp = raw
        .timestamp
        .as_ref()
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingField { field: "timestamp" })?;
    let timestamp = parse_timestamp(timestamp)?;

    Ok(CanonicalEvent {
        transaction_id: transaction_id.to_string(),
        source,
        amount_micros,
        status: TxnStatus::from_normalized(&status),
        timestamp,
        flags: EventFlags {
            delayed: raw.delayed.unwrap_or(false),
            duplicate: raw.duplicate.unwrap_or(false),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawEvent {
        serde_json::from_value(v).unwrap()
    }

    fn valid() -> Value {
        json!({
            "transaction_id": "TXN_1",
            "source": "merchant",
            "amount": 500,
            "status": "success",
            "timestamp": "2026-03-01T12:00:00.250Z"
        })
    }

    // --- amount ---

    #[test]
    fn micros_whole_number() {
        assert_eq!(amount_to_micros(&json!(500)).unwrap(), 500_000_000);
    }

    #[test]
    fn micros_from_float_and_string_agree() {
        assert_eq!(amount_to_micros(&json!(480.25)).unwrap(), 480_250_000);
        assert_eq!(amount_to_micros(&json!("480.25")).unwrap(), 480_250_000);
        assert_eq!(amount_to_micros(&json!(500.0)).unwrap(), 500_000_000);
    }

    #[test]
    fn micros_rejects_non_numeric() {
        for bad in [json!("abc"), json!(""), json!("1.2.3"), json!(true), json!("-5")] {
            assert!(
                matches!(amount_to_micros(&bad), Err(ValidationError::InvalidAmount { .. })),
                "expected rejection for {bad}"
            );
        }
    }

    #[test]
    fn micros_rejects_seven_decimals() {
        assert!(matches!(
            amount_to_micros(&json!("1.0000001")),
            Err(ValidationError::TooManyDecimalPlaces { .. })
        ));
    }

    // --- normalize ---

    #[test]
    fn normalize_uppercases_status_and_converts_timestamp() {
        let ev = normalize(&raw(valid())).unwrap();
        assert_eq!(ev.transaction_id, "TXN_1");
        assert_eq!(ev.source, Source::Merchant);
        assert_eq!(ev.amount_micros, 500_000_000);
        assert_eq!(ev.status, TxnStatus::Success);
        assert_eq!(ev.timestamp.timestamp_millis() % 1000, 250);
        assert_eq!(ev.flags, EventFlags::default());
    }

    #[test]
    fn normalize_accepts_epoch_millis() {
        let mut v = valid();
        v["timestamp"] = json!(1_700_000_000_000_i64);
        let ev = normalize(&raw(v)).unwrap();
        assert_eq!(ev.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn normalize_reports_missing_fields_by_name() {
        for field in ["transaction_id", "source", "amount", "status", "timestamp"] {
            let mut v = valid();
            v.as_object_mut().unwrap().remove(field);
            let err = normalize(&raw(v)).unwrap_err();
            assert_eq!(err, ValidationError::MissingField { field });
            assert_eq!(err.field(), field);
        }
    }

    #[test]
    fn blank_transaction_id_counts_as_missing() {
        let mut v = valid();
        v["transaction_id"] = json!("   ");
        assert_eq!(
            normalize(&raw(v)).unwrap_err(),
            ValidationError::MissingField {
                field: "transaction_id"
            }
        );
    }

    #[test]
    fn unknown_source_is_rejected() {
        let mut v = valid();
        v["source"] = json!("acquirer");
        assert!(matches!(
            normalize(&raw(v)),
            Err(ValidationError::UnknownSource { .. })
        ));
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        let mut v = valid();
        v["timestamp"] = json!("yesterday-ish");
        assert!(matches!(
            normalize(&raw(v)),
            Err(ValidationError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn explicit_flags_are_carried() {
        let mut v = valid();
        v["delayed"] = json!(true);
        v["duplicate"] = json!(true);
        let ev = normalize(&raw(v)).unwrap();
        assert!(ev.flags.delayed);
        assert!(ev.flags.duplicate);
    }
}
