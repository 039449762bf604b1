//! Layered config: merge order, hash stability, typed decoding, guards.

use std::io::Write;

use trc_config::{
    load_layered_yaml, load_layered_yaml_from_strings, report_unused_keys, EngineConfig,
    UnusedKeyPolicy,
};
use trc_schemas::FinalizePolicy;

const BASE_YAML: &str = r#"
buffer:
  ttl_secs: 30
  delayed_bank_after_ms: 5000
finalize:
  policy: bank_anchored
query:
  list_limit: 20
"#;

const BASE_YAML_REORDERED: &str = r#"
query:
  list_limit: 20
finalize:
  policy: bank_anchored
buffer:
  delayed_bank_after_ms: 5000
  ttl_secs: 30
"#;

const OVERLAY_YAML: &str = r#"
buffer:
  ttl_secs: 5
finalize:
  policy: any_two
"#;

#[test]
fn reordered_keys_produce_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
    assert_eq!(a.config_hash.len(), 64, "sha256 hex digest");
}

#[test]
fn overlay_overrides_base_and_changes_hash() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let merged = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(base.config_hash, merged.config_hash);

    let cfg = merged.engine().unwrap();
    assert_eq!(cfg.buffer.ttl_secs, 5);
    // Untouched sibling survives the deep merge.
    assert_eq!(cfg.buffer.delayed_bank_after_ms, Some(5000));
    assert_eq!(cfg.finalize.policy, FinalizePolicy::AnyTwo);
}

#[test]
fn empty_config_decodes_to_defaults() {
    let loaded = load_layered_yaml_from_strings(&[]).unwrap();
    let cfg = loaded.engine().unwrap();
    assert_eq!(cfg, EngineConfig::default());
    assert_eq!(cfg.buffer.ttl_secs, 30);
    assert_eq!(cfg.finalize.policy, FinalizePolicy::BankAnchored);
    assert_eq!(cfg.query.list_limit, 20);
    assert_eq!(cfg.query.volume_window_minutes, 10);
}

#[test]
fn null_delayed_threshold_disables_detection() {
    let loaded = load_layered_yaml_from_strings(&["buffer:\n  delayed_bank_after_ms: null\n"]).unwrap();
    let cfg = loaded.engine().unwrap();
    assert!(cfg.buffer.delayed_bank_after().is_none());
}

#[test]
fn zero_ttl_is_rejected() {
    let loaded = load_layered_yaml_from_strings(&["buffer:\n  ttl_secs: 0\n"]).unwrap();
    assert!(loaded.engine().is_err());
}

#[test]
fn unknown_policy_is_rejected() {
    let loaded = load_layered_yaml_from_strings(&["finalize:\n  policy: whenever\n"]).unwrap();
    assert!(loaded.engine().is_err());
}

#[test]
fn unused_keys_warn_or_fail() {
    let loaded =
        load_layered_yaml_from_strings(&[BASE_YAML, "legacy:\n  redis_url: localhost\n"]).unwrap();

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/redis_url".to_string()]);

    let err = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn consumed_keys_report_clean() {
    let loaded = load_layered_yaml_from_strings(&[
        BASE_YAML,
        "server:\n  allowed_origins:\n    - http://localhost:3000\n",
    ])
    .unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
}

#[test]
fn credentials_in_yaml_are_refused() {
    let err = load_layered_yaml_from_strings(&["server:\n  bind: postgres://u:p@db/trc\n"])
        .unwrap_err();
    assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
    assert!(!err.to_string().contains("u:p"), "secret value must be redacted");
}

#[test]
fn files_load_in_merge_order() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::File::create(&base)
        .unwrap()
        .write_all(BASE_YAML.as_bytes())
        .unwrap();
    std::fs::File::create(&overlay)
        .unwrap()
        .write_all(OVERLAY_YAML.as_bytes())
        .unwrap();

    let loaded = load_layered_yaml(&[
        base.to_str().unwrap(),
        overlay.to_str().unwrap(),
    ])
    .unwrap();
    assert_eq!(loaded.engine().unwrap().buffer.ttl_secs, 5);

    let missing = dir.path().join("nope.yaml");
    assert!(load_layered_yaml(&[missing.to_str().unwrap()]).is_err());
}
