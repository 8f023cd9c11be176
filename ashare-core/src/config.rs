//! Typed configuration for the ingestion core: the recognized TOML keys, their
//! defaults, and the three environment-variable overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AshareError;

/// Default provider failover order for history.
pub const DEFAULT_PROVIDERS: &[&str] = &["eastmoney", "tencent", "sina", "pro_api"];
/// Default provider failover order for realtime quotes.
pub const DEFAULT_REALTIME_PROVIDERS: &[&str] = &["eastmoney", "tencent", "sina", "pro_api"];

fn default_enabled() -> bool {
    true
}
fn default_db_path() -> String {
    "output/databases/market.db".to_string()
}
fn default_adjust() -> String {
    "qfq".to_string()
}
fn default_providers() -> Vec<String> {
    DEFAULT_PROVIDERS.iter().map(|s| (*s).to_string()).collect()
}
fn default_realtime_providers() -> Vec<String> {
    DEFAULT_REALTIME_PROVIDERS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}
fn default_true() -> bool {
    true
}
fn default_circuit_breaker_seconds() -> f64 {
    300.0
}
fn default_retry_max() -> u32 {
    3
}
fn default_retry_backoff_seconds() -> f64 {
    1.0
}
fn default_failure_cooldown_seconds() -> f64 {
    120.0
}
fn default_incremental_history_days() -> i64 {
    20
}
fn default_bootstrap_batch_size() -> usize {
    200
}
fn default_close_finalize_time() -> String {
    "15:05".to_string()
}
fn default_pro_api_token() -> String {
    String::new()
}

/// The ingestion core's recognized configuration keys, with the documented defaults.
///
/// Deserializes from TOML via `serde`; every field has a `#[serde(default = ...)]`,
/// so a partial or absent config file is valid and falls back to [`SyncConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Master switch. When `false`, all sync operations early-return success.
    pub enabled: bool,
    /// Store file location. Relative paths resolve against the process's working directory.
    pub db_path: String,
    /// Adjustment regime tag written into the `daily_prices` primary key.
    pub adjust: String,
    /// History failover order.
    pub providers: Vec<String>,
    /// Realtime-quote failover order.
    pub realtime_providers: Vec<String>,
    /// If `false`, the history path stops after the first provider failure.
    pub provider_failover_enabled: bool,
    /// If `false`, the realtime path stops after the first provider failure.
    pub realtime_provider_failover_enabled: bool,
    /// Circuit-open duration, seconds.
    pub provider_circuit_breaker_seconds: f64,
    /// Attempts per provider call before giving up.
    pub sync_retry_max: u32,
    /// Base backoff seconds, doubled each attempt.
    pub sync_retry_backoff_seconds: f64,
    /// Per-symbol cooldown after a terminal failure, seconds.
    pub sync_failure_cooldown_seconds: f64,
    /// Default incremental-sync window, days.
    pub incremental_history_days: i64,
    /// Progress-log cadence for backfill, in symbols.
    pub bootstrap_batch_size: usize,
    /// Beijing-time market-closed threshold, `HH:MM`.
    pub close_finalize_time: String,
    /// Credential for the Pro-API adapter.
    pub pro_api_token: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            db_path: default_db_path(),
            adjust: default_adjust(),
            providers: default_providers(),
            realtime_providers: default_realtime_providers(),
            provider_failover_enabled: default_true(),
            realtime_provider_failover_enabled: default_true(),
            provider_circuit_breaker_seconds: default_circuit_breaker_seconds(),
            sync_retry_max: default_retry_max(),
            sync_retry_backoff_seconds: default_retry_backoff_seconds(),
            sync_failure_cooldown_seconds: default_failure_cooldown_seconds(),
            incremental_history_days: default_incremental_history_days(),
            bootstrap_batch_size: default_bootstrap_batch_size(),
            close_finalize_time: default_close_finalize_time(),
            pro_api_token: default_pro_api_token(),
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file, falling back to defaults for any key the file omits,
    /// then apply the three documented environment-variable overrides.
    ///
    /// # Errors
    /// Returns [`AshareError::InvalidArg`] if the file exists but fails to parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AshareError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| AshareError::InvalidArg(format!("reading {path:?}: {e}")))?;
            toml::from_str(&raw)
                .map_err(|e| AshareError::InvalidArg(format!("parsing {path:?}: {e}")))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config
            .validate()
            .map_err(|e| AshareError::InvalidArg(e.to_string()))?;
        Ok(config)
    }

    /// Apply `MARKET_DATA_DB_PATH`, `MARKET_DATA_CLOSE_FINALIZE_TIME`, and
    /// `MARKET_DATA_ENABLED` on top of whatever was loaded from the file.
    ///
    /// Precedence is env beats file beats built-in default, applied as an explicit
    /// second pass rather than folded into deserialization.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(db_path) = std::env::var("MARKET_DATA_DB_PATH") {
            if !db_path.is_empty() {
                self.db_path = db_path;
            }
        }
        if let Ok(close_time) = std::env::var("MARKET_DATA_CLOSE_FINALIZE_TIME") {
            if !close_time.is_empty() {
                self.close_finalize_time = close_time;
            }
        }
        if let Ok(enabled) = std::env::var("MARKET_DATA_ENABLED") {
            if let Some(parsed) = parse_bool_env(&enabled) {
                self.enabled = parsed;
            }
        }
    }

    /// Resolve [`Self::db_path`] to an absolute path relative to `base` when it is relative.
    #[must_use]
    pub fn resolved_db_path(&self, base: &Path) -> PathBuf {
        let p = Path::new(&self.db_path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base.join(p)
        }
    }

    fn validate(&self) -> Result<(), AshareError> {
        if crate::clock::parse_close_time(&self.close_finalize_time).is_none() {
            return Err(AshareError::InvalidArg(format!(
                "close_finalize_time {:?} is not HH:MM",
                self.close_finalize_time
            )));
        }
        Ok(())
    }
}

fn parse_bool_env(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
