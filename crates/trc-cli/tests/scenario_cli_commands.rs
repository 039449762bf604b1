//! CLI surface checks that need no database.

use std::fs;

use predicates::prelude::*;

fn trc() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("trc").expect("trc binary built");
    // Keep a developer's .env.local and DB URL out of these runs.
    cmd.current_dir(std::env::temp_dir())
        .env_remove("TRC_DATABASE_URL")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn config_hash_is_stable_across_runs_and_reflects_overrides() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("base.yaml");
    let over = dir.path().join("override.yaml");
    fs::write(&base, "buffer:\n  ttl_secs: 30\nquery:\n  list_limit: 20\n")?;
    fs::write(&over, "buffer:\n  ttl_secs: 45\n")?;

    let run = |paths: &[&std::path::Path]| -> anyhow::Result<String> {
        let out = trc()
            .arg("config-hash")
            .args(paths)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        Ok(String::from_utf8(out)?)
    };

    let a = run(&[&base])?;
    let b = run(&[&base])?;
    let merged = run(&[&base, &over])?;

    assert!(a.starts_with("config_hash="));
    assert_eq!(a, b, "hash is deterministic");
    assert_ne!(a.lines().next(), merged.lines().next());
    assert!(merged.contains("\"ttl_secs\":45"));
    Ok(())
}

#[test]
fn config_hash_refuses_secret_literals() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let p = dir.path().join("leaky.yaml");
    fs::write(&p, "server:\n  bind: 127.0.0.1:5000\n  token: sk_live_abc123\n")?;

    trc()
        .arg("config-hash")
        .arg(&p)
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
    Ok(())
}

#[test]
fn config_hash_rejects_invalid_engine_values() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let p = dir.path().join("zero_ttl.yaml");
    fs::write(&p, "buffer:\n  ttl_secs: 0\n")?;

    trc()
        .arg("config-hash")
        .arg(&p)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ttl_secs"));
    Ok(())
}

#[test]
fn list_rejects_unknown_scenario_before_touching_the_db() {
    trc()
        .args(["list", "--scenario", "NOT_A_SCENARIO"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown scenario"));
}

#[test]
fn db_commands_require_database_url() {
    trc()
        .arg("summary")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TRC_DATABASE_URL"));
}
