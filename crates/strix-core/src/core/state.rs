// crates/strix-core/src/core/state.rs
// ============================================================================
// Module: Strix Scan State
// Description: Scan lifecycle, module lifecycle, logs, and progress snapshots.
// Purpose: Capture deterministic scan evolution with a checked state machine.
// Dependencies: serde, thiserror, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! Scan status forms a state machine owned exclusively by the scheduler:
//!
//! ```text
//! CREATED → STARTING → RUNNING → FINISHED
//!                      ↘         ↗
//!                       ABORT-REQUESTED → ABORTED
//!                      ↘
//!                       ERROR-FAILED
//! ```
//!
//! Transitions are monotonic; `advance` rejects anything not on the diagram.
//! Module state and scan logs are append-only records beside the scan row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::ModuleName;
use crate::core::identifiers::ScanId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Scan Status
// ============================================================================

/// Scan lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and adapter matching.
/// - Only the scheduler writes status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    /// Scan row exists; nothing has run.
    #[serde(rename = "CREATED")]
    Created,
    /// Modules are being resolved and set up.
    #[serde(rename = "STARTING")]
    Starting,
    /// Event phase in progress.
    #[serde(rename = "RUNNING")]
    Running,
    /// Stop requested; draining in progress.
    #[serde(rename = "ABORT-REQUESTED")]
    AbortRequested,
    /// Scan stopped before quiescence.
    #[serde(rename = "ABORTED")]
    Aborted,
    /// Scan reached quiescence cleanly.
    #[serde(rename = "FINISHED")]
    Finished,
    /// Scan failed on a fatal engine or store error.
    #[serde(rename = "ERROR-FAILED")]
    ErrorFailed,
}

impl ScanStatus {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::ErrorFailed)
    }

    /// Returns true when the transition to `next` is on the lifecycle diagram.
    #[must_use]
    pub const fn can_advance(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Running, Self::Finished)
                | (Self::Running, Self::AbortRequested)
                | (Self::AbortRequested, Self::Aborted)
                | (Self::Created | Self::Starting | Self::Running | Self::AbortRequested, Self::ErrorFailed)
        )
    }

    /// Validates and performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::IllegalTransition`] when `next` is not reachable
    /// from the current status.
    pub fn advance(self, next: Self) -> Result<Self, StatusError> {
        if self.can_advance(next) {
            Ok(next)
        } else {
            Err(StatusError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::AbortRequested => "ABORT-REQUESTED",
            Self::Aborted => "ABORTED",
            Self::Finished => "FINISHED",
            Self::ErrorFailed => "ERROR-FAILED",
        }
    }

    /// Parses a stored wire label.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownLabel`] for labels not on the lifecycle
    /// diagram.
    pub fn parse(label: &str) -> Result<Self, StatusError> {
        match label {
            "CREATED" => Ok(Self::Created),
            "STARTING" => Ok(Self::Starting),
            "RUNNING" => Ok(Self::Running),
            "ABORT-REQUESTED" => Ok(Self::AbortRequested),
            "ABORTED" => Ok(Self::Aborted),
            "FINISHED" => Ok(Self::Finished),
            "ERROR-FAILED" => Ok(Self::ErrorFailed),
            other => Err(StatusError::UnknownLabel(other.to_string())),
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by status parsing and transitions.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// Transition not present on the lifecycle diagram.
    #[error("illegal scan status transition: {from} -> {to}")]
    IllegalTransition {
        /// Status before the attempted transition.
        from: ScanStatus,
        /// Rejected target status.
        to: ScanStatus,
    },
    /// Stored label did not match any known status.
    #[error("unknown scan status label: {0}")]
    UnknownLabel(String),
}

// ============================================================================
// SECTION: Module Status
// ============================================================================

/// Per-scan module lifecycle.
///
/// # Invariants
/// - Variants are stable for serialization and adapter matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Module selected but not yet set up.
    Pending,
    /// Module set up and receiving events.
    Running,
    /// Module reached idle at scan quiescence.
    Finished,
    /// Module excluded after setup failure or exceeding its error threshold.
    Errored,
    /// Module skipped by selection or configuration.
    Skipped,
}

impl ModuleStatus {
    /// Returns true for terminal module states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored | Self::Skipped)
    }

    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Errored => "errored",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a stored wire label.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownLabel`] for unrecognized labels.
    pub fn parse(label: &str) -> Result<Self, StatusError> {
        match label {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "errored" => Ok(Self::Errored),
            "skipped" => Ok(Self::Skipped),
            other => Err(StatusError::UnknownLabel(other.to_string())),
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-(scan, module) state row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Module name.
    pub module: ModuleName,
    /// Module lifecycle status.
    pub status: ModuleStatus,
    /// Number of events the module has produced.
    pub events_produced: u64,
    /// Time the module began receiving events.
    pub started: Option<Timestamp>,
    /// Time the module reached a terminal state.
    pub ended: Option<Timestamp>,
}

impl ModuleState {
    /// Creates a pending state row for a selected module.
    #[must_use]
    pub const fn pending(module: ModuleName) -> Self {
        Self {
            module,
            status: ModuleStatus::Pending,
            events_produced: 0,
            started: None,
            ended: None,
        }
    }
}

// ============================================================================
// SECTION: Scan Logs
// ============================================================================

/// Severity of a durable scan log entry.
///
/// # Invariants
/// - Variants are stable for serialization and adapter matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Diagnostic detail.
    #[serde(rename = "DEBUG")]
    Debug,
    /// Normal progress information.
    #[serde(rename = "INFO")]
    Info,
    /// Recoverable problem.
    #[serde(rename = "WARNING")]
    Warning,
    /// Failure requiring attention.
    #[serde(rename = "ERROR")]
    Error,
}

impl LogLevel {
    /// Returns the stable wire label for the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    /// Parses a stored wire label.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownLabel`] for unrecognized labels.
    pub fn parse(label: &str) -> Result<Self, StatusError> {
        match label {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            other => Err(StatusError::UnknownLabel(other.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only scan log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Entry time.
    pub generated: Timestamp,
    /// Component that produced the entry (module name or engine).
    pub component: String,
    /// Entry severity.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
}

impl LogEntry {
    /// Creates a log entry stamped with the current time.
    #[must_use]
    pub fn new(component: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            generated: Timestamp::now(),
            component: component.into(),
            level,
            message: message.into(),
        }
    }
}

// ============================================================================
// SECTION: Scan Record
// ============================================================================

/// Durable scan row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Scan identifier.
    pub scan_id: ScanId,
    /// Display name.
    pub name: String,
    /// Seed target value.
    pub seed_target: String,
    /// Classified seed target type.
    pub seed_type: String,
    /// Row creation time.
    pub created: Timestamp,
    /// Event phase start time.
    pub started: Option<Timestamp>,
    /// Terminal time.
    pub ended: Option<Timestamp>,
    /// Lifecycle status.
    pub status: ScanStatus,
    /// Names of the selected modules.
    pub modules: Vec<ModuleName>,
}

// ============================================================================
// SECTION: Progress Snapshots
// ============================================================================

/// Per-module progress line inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgress {
    /// Module name.
    pub name: ModuleName,
    /// Module lifecycle status.
    pub status: ModuleStatus,
    /// Number of events the module has produced.
    pub events_produced: u64,
    /// Time the module began receiving events.
    pub started_at: Option<Timestamp>,
    /// Time the module reached a terminal state.
    pub finished_at: Option<Timestamp>,
}

/// Cheap point-in-time view of a scan's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Scan identifier.
    pub scan_id: ScanId,
    /// Lifecycle status at snapshot time.
    pub status: ScanStatus,
    /// Percent of modules in a terminal state, 0-100.
    pub overall_percent: u8,
    /// Total selected modules.
    pub modules_total: u64,
    /// Modules in a terminal state.
    pub modules_finished: u64,
    /// Modules currently running.
    pub modules_running: u64,
    /// Per-module progress lines.
    pub modules: Vec<ModuleProgress>,
    /// Snapshot time.
    pub timestamp: Timestamp,
}

impl ProgressSnapshot {
    /// Computes the overall percentage from module counts.
    ///
    /// Zero selected modules reads as 100 percent so an empty selection
    /// reports complete immediately after seeding.
    #[must_use]
    pub fn percent(modules_finished: u64, modules_total: u64) -> u8 {
        if modules_total == 0 {
            return 100;
        }
        let scaled = modules_finished.saturating_mul(100) / modules_total;
        u8::try_from(scaled.min(100)).unwrap_or(100)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_happy_path() {
        let status = ScanStatus::Created
            .advance(ScanStatus::Starting)
            .and_then(|s| s.advance(ScanStatus::Running))
            .and_then(|s| s.advance(ScanStatus::Finished));
        assert_eq!(status, Ok(ScanStatus::Finished));
    }

    #[test]
    fn lifecycle_abort_path() {
        let status = ScanStatus::Running
            .advance(ScanStatus::AbortRequested)
            .and_then(|s| s.advance(ScanStatus::Aborted));
        assert_eq!(status, Ok(ScanStatus::Aborted));
    }

    #[test]
    fn terminal_states_do_not_advance() {
        for terminal in [ScanStatus::Finished, ScanStatus::Aborted, ScanStatus::ErrorFailed] {
            assert!(terminal.advance(ScanStatus::Running).is_err());
            assert!(terminal.advance(ScanStatus::ErrorFailed).is_err());
        }
    }

    #[test]
    fn error_failed_reachable_from_live_states() {
        for live in [
            ScanStatus::Created,
            ScanStatus::Starting,
            ScanStatus::Running,
            ScanStatus::AbortRequested,
        ] {
            assert!(live.can_advance(ScanStatus::ErrorFailed));
        }
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            ScanStatus::Created,
            ScanStatus::Starting,
            ScanStatus::Running,
            ScanStatus::AbortRequested,
            ScanStatus::Aborted,
            ScanStatus::Finished,
            ScanStatus::ErrorFailed,
        ] {
            assert_eq!(ScanStatus::parse(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn percent_with_no_modules_is_complete() {
        assert_eq!(ProgressSnapshot::percent(0, 0), 100);
    }

    #[test]
    fn percent_scales_by_finished() {
        assert_eq!(ProgressSnapshot::percent(1, 4), 25);
        assert_eq!(ProgressSnapshot::percent(4, 4), 100);
    }
}
