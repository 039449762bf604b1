//! Typed view of the merged configuration document.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trc_schemas::FinalizePolicy;

/// Overrides `server.bind`.
pub const ENV_DAEMON_ADDR: &str = "TRC_DAEMON_ADDR";
/// Comma-separated YAML layer paths, in merge order.
pub const ENV_CONFIG_PATHS: &str = "TRC_CONFIG";

/// Upper bound for buffer windows (one day).
pub const MAX_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub buffer: BufferConfig,
    pub finalize: FinalizeConfig,
    pub notify: NotifyConfig,
    pub query: QueryConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Lifetime of a buffer entry, anchored to its first event.
    pub ttl_secs: u64,
    /// A bank event arriving this long after the first event is flagged
    /// delayed. `None` disables detection (explicit flags still count).
    pub delayed_bank_after_ms: Option<u64>,
    /// Janitor sweep interval; memory hygiene only.
    pub purge_interval_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            delayed_bank_after_ms: Some(5_000),
            purge_interval_secs: 10,
        }
    }
}

impl BufferConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn delayed_bank_after(&self) -> Option<Duration> {
        self.delayed_bank_after_ms.map(Duration::from_millis)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    pub policy: FinalizePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub channel_capacity: usize,
    /// Size of the recent-updates ring served to reconnecting clients.
    pub recent_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            recent_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub list_limit: usize,
    pub volume_window_minutes: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            list_limit: 20,
            volume_window_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("invalid server.bind address: {}", self.bind))
    }
}

impl EngineConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: EngineConfig =
            serde_json::from_value(v.clone()).context("config does not match engine schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.buffer.ttl_secs > 0, "buffer.ttl_secs must be > 0");
        anyhow::ensure!(
            self.buffer.ttl_secs <= MAX_TTL_SECS,
            "buffer.ttl_secs must be <= {MAX_TTL_SECS}"
        );
        if let Some(ms) = self.buffer.delayed_bank_after_ms {
            anyhow::ensure!(
                ms <= self.buffer.ttl_secs * 1_000,
                "buffer.delayed_bank_after_ms must not exceed buffer.ttl_secs"
            );
        }
        anyhow::ensure!(
            self.buffer.purge_interval_secs <= MAX_TTL_SECS,
            "buffer.purge_interval_secs must be <= {MAX_TTL_SECS}"
        );
        anyhow::ensure!(
            self.notify.channel_capacity > 0,
            "notify.channel_capacity must be > 0"
        );
        anyhow::ensure!(self.query.list_limit > 0, "query.list_limit must be > 0");
        Ok(())
    }

    /// Apply process-environment overrides on top of file config.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|k| std::env::var(k).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_DAEMON_ADDR).filter(|s| !s.trim().is_empty()) {
            self.server.bind = addr.trim().to_string();
        }
    }
}

/// YAML layer paths from `TRC_CONFIG`, or empty when unset.
pub fn config_paths_from_env() -> Vec<String> {
    split_paths(std::env::var(ENV_CONFIG_PATHS).ok().as_deref())
}

fn split_paths(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
