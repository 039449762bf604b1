use std::collections::BTreeSet;

use trc_schemas::{ReconciliationOutcome, Scenario, Source};

use crate::SourceEvents;

pub const REASON_BANK_MISSING: &str = "Bank confirmation missing";
pub const REASON_AMOUNTS_DIFFER: &str = "Amounts differ across sources";
pub const REASON_STATUS_CONFLICT: &str = "Status conflict between sources";

/// Deterministic scenario classification. First matching rule wins:
///
/// 1. bank absent                      => MISSING_EVENT   (MISMATCH)
/// 2. more than one distinct amount    => AMOUNT_MISMATCH (MISMATCH)
/// 3. more than one distinct status    => STATUS_CONFLICT (MISMATCH)
/// 4. bank flagged delayed             => DELAYED_BANK    (MATCHED)
/// 5. gateway flagged duplicate        => DUPLICATE_EVENT (MATCHED)
/// 6. otherwise                        => PERFECT_MATCH   (MATCHED)
///
/// The rules overlap, so the order is part of the contract: a missing bank
/// masks any amount or status disagreement between merchant and gateway.
pub fn classify(events: &SourceEvents) -> ReconciliationOutcome {
    let Some(bank) = events.get(&Source::Bank) else {
        return ReconciliationOutcome::mismatch(Scenario::MissingEvent, REASON_BANK_MISSING);
    };

    let amounts: BTreeSet<i64> = events.values().map(|e| e.amount_micros).collect();
    if amounts.len() > 1 {
        return ReconciliationOutcome::mismatch(Scenario::AmountMismatch, REASON_AMOUNTS_DIFFER);
    }

    let statuses: BTreeSet<&str> = events.values().map(|e| e.status.as_str()).collect();
    if statuses.len() > 1 {
        return ReconciliationOutcome::mismatch(Scenario::StatusConflict, REASON_STATUS_CONFLICT);
    }

    if bank.flags.delayed {
        return ReconciliationOutcome::matched(Scenario::DelayedBank);
    }

    if events
        .get(&Source::Gateway)
        .is_some_and(|gw| gw.flags.duplicate)
    {
        return ReconciliationOutcome::matched(Scenario::DuplicateEvent);
    }

    ReconciliationOutcome::matched(Scenario::PerfectMatch)
}
