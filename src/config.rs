//! Server configuration loaded from a TOML file.
//!
//! The core never reads environment variables directly; the thin binary
//! resolves `config_path()`, loads it, and passes the parsed [`ServerConfig`]
//! into [`crate::run`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_bind() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_fast_fail_window_ms() -> u64 {
    2_000
}

fn default_termination_grace_ms() -> u64 {
    2_000
}

fn default_bus_capacity() -> usize {
    1_000
}

fn default_subscriber_capacity() -> usize {
    256
}

fn default_subscriber_backlog() -> usize {
    50
}

fn default_keepalive_seconds() -> u64 {
    15
}

fn default_eviction_interval_seconds() -> u64 {
    60
}

fn default_health_poll_seconds() -> u64 {
    5
}

/// Per-mode overrides of the compiled-in catalog defaults (tool search
/// paths and TTL). Mirrors the TOML layer / code layer split of
/// `IngestConfigFile` / `TomlDataStream`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModeOverride {
    #[serde(default)]
    pub tool_paths: Vec<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Top-level configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_bind")]
    pub http_bind: String,

    #[serde(default = "default_metrics_bind")]
    pub metrics_bind: String,

    #[serde(default = "default_fast_fail_window_ms")]
    pub fast_fail_window_ms: u64,

    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,

    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    #[serde(default = "default_subscriber_backlog")]
    pub subscriber_backlog: usize,

    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,

    #[serde(default = "default_eviction_interval_seconds")]
    pub eviction_interval_seconds: u64,

    #[serde(default = "default_health_poll_seconds")]
    pub health_poll_seconds: u64,

    /// Working directory for tools that must emit files (capture CSVs, NDJSON).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub mode_overrides: HashMap<String, ModeOverride>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind: default_http_bind(),
            metrics_bind: default_metrics_bind(),
            fast_fail_window_ms: default_fast_fail_window_ms(),
            termination_grace_ms: default_termination_grace_ms(),
            bus_capacity: default_bus_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
            subscriber_backlog: default_subscriber_backlog(),
            keepalive_seconds: default_keepalive_seconds(),
            eviction_interval_seconds: default_eviction_interval_seconds(),
            health_poll_seconds: default_health_poll_seconds(),
            working_dir: None,
            mode_overrides: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| format!("failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Save config to a TOML file (atomic: write to .tmp then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `VALENTINE_CONFIG` env var
/// 2. `./valentine.toml`
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("VALENTINE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("./valentine.toml")
}
