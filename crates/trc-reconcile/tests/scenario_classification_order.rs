use chrono::{TimeZone, Utc};
use trc_reconcile::*;
use trc_schemas::{CanonicalEvent, EventFlags, FinalStatus, Scenario, Source, TxnStatus};

fn ev(source: Source, amount: i64, status: TxnStatus) -> CanonicalEvent {
    CanonicalEvent {
        transaction_id: "TXN_ORDER".to_string(),
        source,
        amount_micros: amount * 1_000_000,
        status,
        timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        flags: EventFlags::default(),
    }
}

fn all_three(m: i64, g: i64, b: i64) -> SourceEvents {
    let mut e = SourceEvents::new();
    e.insert(Source::Merchant, ev(Source::Merchant, m, TxnStatus::Success));
    e.insert(Source::Gateway, ev(Source::Gateway, g, TxnStatus::Success));
    e.insert(Source::Bank, ev(Source::Bank, b, TxnStatus::Success));
    e
}

#[test]
fn scenario_perfect_match_has_no_reason() {
    let out = classify(&all_three(500, 500, 500));
    assert_eq!(out.scenario, Scenario::PerfectMatch);
    assert_eq!(out.final_status, FinalStatus::Matched);
    assert!(out.mismatch_reason.is_none());
}

#[test]
fn scenario_bank_short_pays_is_amount_mismatch() {
    let out = classify(&all_three(500, 500, 480));
    assert_eq!(out.scenario, Scenario::AmountMismatch);
    assert_eq!(out.final_status, FinalStatus::Mismatch);
    assert_eq!(out.mismatch_reason.as_deref(), Some(REASON_AMOUNTS_DIFFER));
}

#[test]
fn scenario_amount_mismatch_outranks_status_conflict() {
    let mut e = all_three(500, 500, 480);
    e.get_mut(&Source::Bank).unwrap().status = TxnStatus::Failed;
    assert_eq!(classify(&e).scenario, Scenario::AmountMismatch);
}

#[test]
fn scenario_status_conflict_outranks_delayed_and_duplicate() {
    let mut e = all_three(500, 500, 500);
    {
        let bank = e.get_mut(&Source::Bank).unwrap();
        bank.status = TxnStatus::Failed;
        bank.flags.delayed = true;
    }
    e.get_mut(&Source::Gateway).unwrap().flags.duplicate = true;

    let out = classify(&e);
    assert_eq!(out.scenario, Scenario::StatusConflict);
    assert_eq!(out.mismatch_reason.as_deref(), Some(REASON_STATUS_CONFLICT));
}

#[test]
fn scenario_delayed_bank_requires_agreement() {
    let mut e = all_three(500, 500, 500);
    e.get_mut(&Source::Bank).unwrap().flags.delayed = true;
    let out = classify(&e);
    assert_eq!(out.scenario, Scenario::DelayedBank);
    assert_eq!(out.final_status, FinalStatus::Matched);

    // Same flag but amounts disagree: the mismatch wins.
    let mut e = all_three(500, 500, 490);
    e.get_mut(&Source::Bank).unwrap().flags.delayed = true;
    assert_eq!(classify(&e).scenario, Scenario::AmountMismatch);
}

#[test]
fn scenario_delayed_bank_outranks_duplicate_gateway() {
    let mut e = all_three(500, 500, 500);
    e.get_mut(&Source::Bank).unwrap().flags.delayed = true;
    e.get_mut(&Source::Gateway).unwrap().flags.duplicate = true;
    assert_eq!(classify(&e).scenario, Scenario::DelayedBank);
}

#[test]
fn scenario_duplicate_flag_only_counts_on_gateway() {
    let mut e = all_three(500, 500, 500);
    e.get_mut(&Source::Merchant).unwrap().flags.duplicate = true;
    assert_eq!(classify(&e).scenario, Scenario::PerfectMatch);

    e.get_mut(&Source::Gateway).unwrap().flags.duplicate = true;
    let out = classify(&e);
    assert_eq!(out.scenario, Scenario::DuplicateEvent);
    assert_eq!(out.final_status, FinalStatus::Matched);
}

#[test]
fn scenario_two_sources_with_bank_are_compared() {
    let mut e = SourceEvents::new();
    e.insert(Source::Merchant, ev(Source::Merchant, 500, TxnStatus::Success));
    e.insert(Source::Bank, ev(Source::Bank, 500, TxnStatus::Failed));
    assert_eq!(classify(&e).scenario, Scenario::StatusConflict);
}
