// crates/strix-config/src/config.rs
// ============================================================================
// Module: Strix Configuration
// Description: Configuration loading and validation for the Strix engine.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: strix-core, strix-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and range
//! limits. The file location is taken from an explicit path, the
//! `STRIX_CONFIG` environment variable, or `strix.toml` in the working
//! directory; an absent file yields compiled-in defaults, but a present file
//! that fails to parse or validate is a hard error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use strix_core::EngineSettings;
use strix_store_sqlite::SqliteStoreConfig;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "strix.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "STRIX_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum worker threads per scan.
pub(crate) const MAX_WORKER_THREADS: usize = 256;
/// Maximum bus queue capacity.
pub(crate) const MAX_BUS_CAPACITY: usize = 1_048_576;
/// Minimum module call timeout in seconds.
pub(crate) const MIN_MODULE_TIMEOUT_SECS: u64 = 1;
/// Maximum module call timeout in seconds.
pub(crate) const MAX_MODULE_TIMEOUT_SECS: u64 = 3_600;
/// Minimum abort drain timeout in seconds.
pub(crate) const MIN_ABORT_TIMEOUT_SECS: u64 = 1;
/// Maximum abort drain timeout in seconds.
pub(crate) const MAX_ABORT_TIMEOUT_SECS: u64 = 600;
/// Maximum module error threshold.
pub(crate) const MAX_MODULE_ERROR_THRESHOLD: u32 = 1_000;
/// Maximum quiescence grace window in milliseconds.
pub(crate) const MAX_QUIESCENCE_GRACE_MS: u64 = 60_000;
/// Maximum store retry limit.
pub(crate) const MAX_STORE_RETRY_LIMIT: u32 = 20;
/// Maximum default-option entries.
pub(crate) const MAX_DEFAULT_OPTIONS: usize = 1_024;
/// Default SSE poll interval in milliseconds.
const DEFAULT_PROGRESS_POLL_MS: u64 = 1_000;
/// Maximum SSE poll interval in milliseconds.
pub(crate) const MAX_PROGRESS_POLL_MS: u64 = 30_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("config file unreadable: {0}")]
    Io(String),
    /// File exceeded the size cap.
    #[error("config file too large: {actual} bytes (max {max})")]
    TooLarge {
        /// Maximum allowed size.
        max: usize,
        /// Observed size.
        actual: usize,
    },
    /// TOML failed to parse.
    #[error("config parse failure: {0}")]
    Parse(String),
    /// A value failed a range or consistency check.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Scheduler knob section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Worker threads per scan.
    pub worker_threads: usize,
    /// Bus queue capacity before publishers block.
    pub bus_capacity: usize,
    /// Budget for one module call, in seconds.
    pub module_timeout_secs: u64,
    /// Bound on the drain period after a stop request, in seconds.
    pub abort_timeout_secs: u64,
    /// Transient errors tolerated before a module is excluded.
    pub module_error_threshold: u32,
    /// Idle window required before quiescence, in milliseconds.
    pub quiescence_grace_ms: u64,
    /// Bounded retries for transient store failures.
    pub store_retry_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let defaults = EngineSettings::default();
        Self {
            worker_threads: defaults.worker_threads,
            bus_capacity: defaults.bus_capacity,
            module_timeout_secs: defaults.module_timeout.as_secs(),
            abort_timeout_secs: defaults.abort_timeout.as_secs(),
            module_error_threshold: defaults.module_error_threshold,
            quiescence_grace_ms: u64::try_from(defaults.quiescence_grace.as_millis())
                .unwrap_or(250),
            store_retry_limit: defaults.store_retry_limit,
        }
    }
}

/// Correlation engine section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CorrelationsConfig {
    /// Directory of YAML rule files.
    pub dir: PathBuf,
    /// Run rules automatically when the event phase ends.
    pub auto_run: bool,
}

impl Default for CorrelationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("correlations"),
            auto_run: true,
        }
    }
}

/// REST server section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: SocketAddr,
    /// SSE progress poll interval in milliseconds.
    pub progress_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5001)),
            progress_poll_ms: DEFAULT_PROGRESS_POLL_MS,
        }
    }
}

/// Root engine configuration.
///
/// # Invariants
/// - `validate` has passed for every instance returned by `load`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Scheduler knobs.
    pub scheduler: SchedulerConfig,
    /// Durable store backend.
    pub store: Option<SqliteStoreConfig>,
    /// Correlation rule settings.
    pub correlations: CorrelationsConfig,
    /// REST server settings.
    pub server: ServerConfig,
    /// Global default scan options.
    pub options: BTreeMap<String, String>,
}

impl EngineConfig {
    /// Loads configuration from the given path, the `STRIX_CONFIG`
    /// environment variable, or `strix.toml`, in that order.
    ///
    /// A missing file yields defaults; a present file must parse and
    /// validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unreadable, oversized, unparseable, or
    /// out-of-range configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved: PathBuf = match path {
            Some(path) => path.to_path_buf(),
            None => env::var(CONFIG_ENV_VAR)
                .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME), PathBuf::from),
        };
        if !resolved.exists() {
            if path.is_some() {
                return Err(ConfigError::Io(format!(
                    "config file not found: {}",
                    resolved.display()
                )));
            }
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = fs::read_to_string(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if raw.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                max: MAX_CONFIG_FILE_SIZE,
                actual: raw.len(),
            });
        }
        let config: Self =
            toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every knob against its hard limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending knob.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        if scheduler.worker_threads == 0 || scheduler.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::Invalid(format!(
                "scheduler.worker_threads out of range: {} (1..={MAX_WORKER_THREADS})",
                scheduler.worker_threads
            )));
        }
        if scheduler.bus_capacity == 0 || scheduler.bus_capacity > MAX_BUS_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "scheduler.bus_capacity out of range: {} (1..={MAX_BUS_CAPACITY})",
                scheduler.bus_capacity
            )));
        }
        if scheduler.module_timeout_secs < MIN_MODULE_TIMEOUT_SECS
            || scheduler.module_timeout_secs > MAX_MODULE_TIMEOUT_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "scheduler.module_timeout_secs out of range: {} \
                 ({MIN_MODULE_TIMEOUT_SECS}..={MAX_MODULE_TIMEOUT_SECS})",
                scheduler.module_timeout_secs
            )));
        }
        if scheduler.abort_timeout_secs < MIN_ABORT_TIMEOUT_SECS
            || scheduler.abort_timeout_secs > MAX_ABORT_TIMEOUT_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "scheduler.abort_timeout_secs out of range: {} \
                 ({MIN_ABORT_TIMEOUT_SECS}..={MAX_ABORT_TIMEOUT_SECS})",
                scheduler.abort_timeout_secs
            )));
        }
        if scheduler.module_error_threshold == 0
            || scheduler.module_error_threshold > MAX_MODULE_ERROR_THRESHOLD
        {
            return Err(ConfigError::Invalid(format!(
                "scheduler.module_error_threshold out of range: {} \
                 (1..={MAX_MODULE_ERROR_THRESHOLD})",
                scheduler.module_error_threshold
            )));
        }
        if scheduler.quiescence_grace_ms == 0
            || scheduler.quiescence_grace_ms > MAX_QUIESCENCE_GRACE_MS
        {
            return Err(ConfigError::Invalid(format!(
                "scheduler.quiescence_grace_ms out of range: {} (1..={MAX_QUIESCENCE_GRACE_MS})",
                scheduler.quiescence_grace_ms
            )));
        }
        if scheduler.store_retry_limit > MAX_STORE_RETRY_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "scheduler.store_retry_limit out of range: {} (0..={MAX_STORE_RETRY_LIMIT})",
                scheduler.store_retry_limit
            )));
        }
        if self.options.len() > MAX_DEFAULT_OPTIONS {
            return Err(ConfigError::Invalid(format!(
                "options has too many entries: {} (max {MAX_DEFAULT_OPTIONS})",
                self.options.len()
            )));
        }
        if self.server.progress_poll_ms == 0 || self.server.progress_poll_ms > MAX_PROGRESS_POLL_MS
        {
            return Err(ConfigError::Invalid(format!(
                "server.progress_poll_ms out of range: {} (1..={MAX_PROGRESS_POLL_MS})",
                self.server.progress_poll_ms
            )));
        }
        Ok(())
    }

    /// Converts the scheduler section into core engine settings.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            worker_threads: self.scheduler.worker_threads,
            bus_capacity: self.scheduler.bus_capacity,
            module_timeout: Duration::from_secs(self.scheduler.module_timeout_secs),
            abort_timeout: Duration::from_secs(self.scheduler.abort_timeout_secs),
            module_error_threshold: self.scheduler.module_error_threshold,
            quiescence_grace: Duration::from_millis(self.scheduler.quiescence_grace_ms),
            store_retry_limit: self.scheduler.store_retry_limit,
            default_options: self.options.clone(),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_worker_threads_is_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.worker_threads = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn settings_conversion_preserves_knobs() {
        let mut config = EngineConfig::default();
        config.scheduler.module_timeout_secs = 10;
        config.options.insert("timeout".to_string(), "5".to_string());
        let settings = config.engine_settings();
        assert_eq!(settings.module_timeout, Duration::from_secs(10));
        assert_eq!(settings.default_options.get("timeout").map(String::as_str), Some("5"));
    }
}
