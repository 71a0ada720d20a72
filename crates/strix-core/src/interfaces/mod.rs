// crates/strix-core/src/interfaces/mod.rs
// ============================================================================
// Module: Strix Interfaces
// Description: Backend-agnostic interfaces for storage, modules, and correlation.
// Purpose: Define the contract surfaces used by the Strix scan engine.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the scan engine integrates with storage backends,
//! data-gathering modules, and the correlation engine without embedding
//! backend-specific details. Implementations must be deterministic and fail
//! closed on missing or invalid data. Modules never touch the store directly;
//! every produced event flows through [`ScanContext::notify_listeners`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::event::Event;
use crate::core::event::EventDraft;
use crate::core::identifiers::EventHash;
use crate::core::identifiers::ModuleName;
use crate::core::identifiers::ScanId;
use crate::core::options::ScanOptions;
use crate::core::state::LogEntry;
use crate::core::state::LogLevel;
use crate::core::state::ModuleState;
use crate::core::state::ScanRecord;
use crate::core::state::ScanStatus;
use crate::core::summary::CorrelationRecord;
use crate::core::summary::ScanListRow;
use crate::core::summary::SummaryRow;
use crate::core::summary::UniqueRow;
use crate::core::summary::VizEdge;
use crate::core::summary::VizGraph;
use crate::core::summary::VizNode;
use crate::core::target::Target;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Event store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Only [`StoreError::Transient`] is retriable.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Backend engine error.
    #[error("store db error: {0}")]
    Db(String),
    /// Referenced scan or row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid store data or request.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Operation conflicts with current scan state.
    #[error("store conflict: {0}")]
    Conflict(String),
    /// Store is busy and the caller should retry.
    #[error("store transient failure: {message}")]
    Transient {
        /// Retryable failure message.
        message: String,
        /// Optional retry delay in milliseconds.
        retry_after_ms: Option<u64>,
    },
}

impl StoreError {
    /// Returns true when a bounded retry is appropriate.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

// ============================================================================
// SECTION: Event Store
// ============================================================================

/// Default page size for event queries.
pub const DEFAULT_EVENT_PAGE: usize = 100;
/// Default page size for log queries.
pub const DEFAULT_LOG_PAGE: usize = 500;

/// Filter and pagination parameters for event reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Restrict to one producing module.
    pub module: Option<ModuleName>,
    /// Keep only events with at least this risk.
    pub min_risk: Option<u8>,
    /// Keep only events generated at or after this time.
    pub since: Option<Timestamp>,
    /// Maximum rows returned.
    pub limit: usize,
    /// Rows skipped before the first returned row.
    pub offset: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            module: None,
            min_risk: None,
            since: None,
            limit: DEFAULT_EVENT_PAGE,
            offset: 0,
        }
    }
}

/// Filter parameters for log reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Restrict to one severity.
    pub level: Option<LogLevel>,
    /// Maximum rows returned.
    pub limit: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            level: None,
            limit: DEFAULT_LOG_PAGE,
        }
    }
}

/// Backend-agnostic durable event store.
///
/// Implementations serialize writes within one scan so row ordering stays
/// stable; reads tolerate partial state while a scan is running.
pub trait EventStore: Send + Sync {
    /// Creates the scan row and freezes the option snapshot atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the row exists or the write fails.
    fn create_scan(&self, record: &ScanRecord, options: &ScanOptions) -> Result<(), StoreError>;

    /// Inserts an event, idempotent on `(scan_id, hash)`.
    ///
    /// Returns true when the row was inserted and false when the hash was
    /// already witnessed for the scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_event(&self, scan: &ScanId, event: &Event) -> Result<bool, StoreError>;

    /// Updates the scan lifecycle row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the scan is unknown or the write fails.
    fn set_scan_status(
        &self,
        scan: &ScanId,
        status: ScanStatus,
        started: Option<Timestamp>,
        ended: Option<Timestamp>,
    ) -> Result<(), StoreError>;

    /// Upserts one module's state row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn update_module_state(&self, scan: &ScanId, state: &ModuleState) -> Result<(), StoreError>;

    /// Appends a durable scan log entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn append_log(&self, scan: &ScanId, entry: &LogEntry) -> Result<(), StoreError>;

    /// Sets or clears the false positive flag on the given event hashes.
    ///
    /// Returns the number of rows updated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the scan is unknown or the write fails.
    fn set_false_positive(
        &self,
        scan: &ScanId,
        hashes: &[EventHash],
        flag: bool,
    ) -> Result<u64, StoreError>;

    /// Writes one correlation result and its event links in one transaction.
    ///
    /// Idempotent on `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn write_correlation(
        &self,
        scan: &ScanId,
        record: &CorrelationRecord,
    ) -> Result<(), StoreError>;

    /// Removes all rows belonging to a scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown scans and
    /// [`StoreError::Conflict`] when the scan is still running.
    fn delete_scan(&self, scan: &ScanId) -> Result<(), StoreError>;

    /// Reads the scan row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown scans.
    fn get_scan(&self, scan: &ScanId) -> Result<ScanRecord, StoreError>;

    /// Lists all scans, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn list_scans(&self) -> Result<Vec<ScanListRow>, StoreError>;

    /// Reads the frozen option snapshot for a scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown scans.
    fn scan_options(&self, scan: &ScanId) -> Result<ScanOptions, StoreError>;

    /// Reads all module state rows for a scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn module_states(&self, scan: &ScanId) -> Result<Vec<ModuleState>, StoreError>;

    /// Reads per-type totals and uniques for a scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn summary(&self, scan: &ScanId) -> Result<Vec<SummaryRow>, StoreError>;

    /// Reads a filtered, paginated event page.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn events(&self, scan: &ScanId, query: &EventQuery) -> Result<Vec<Event>, StoreError>;

    /// Reads distinct data values and counts for one event type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn events_unique(&self, scan: &ScanId, event_type: &str) -> Result<Vec<UniqueRow>, StoreError>;

    /// Reads every event of a scan, ordered by generation time.
    ///
    /// Used by the correlation engine, which resolves the event graph in
    /// memory for one rule pass.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn all_events(&self, scan: &ScanId) -> Result<Vec<Event>, StoreError>;

    /// Reads scan log entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn logs(&self, scan: &ScanId, query: &LogQuery) -> Result<Vec<LogEntry>, StoreError>;

    /// Projects the event graph for visualization.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn viz(&self, scan: &ScanId) -> Result<VizGraph, StoreError>;

    /// Reads all correlation results for a scan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn correlations(&self, scan: &ScanId) -> Result<Vec<CorrelationRecord>, StoreError>;
}

// ============================================================================
// SECTION: Module Contract
// ============================================================================

/// Module use-case tag used to expand group selections.
///
/// # Invariants
/// - Variants are stable for serialization and selection matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UseCase {
    /// No target contact; third-party sources only.
    Passive,
    /// Light direct interaction with the target.
    Investigate,
    /// Full enumeration including invasive probes.
    Footprint,
    /// Every registered module.
    All,
}

impl UseCase {
    /// Parses a selection label, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownUseCase`] for unrecognized labels.
    pub fn parse(label: &str) -> Result<Self, ResolveError> {
        match label.to_ascii_lowercase().as_str() {
            "passive" => Ok(Self::Passive),
            "investigate" => Ok(Self::Investigate),
            "footprint" => Ok(Self::Footprint),
            "all" => Ok(Self::All),
            other => Err(ResolveError::UnknownUseCase(other.to_string())),
        }
    }

    /// Returns the stable label for the use case.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passive => "Passive",
            Self::Investigate => "Investigate",
            Self::Footprint => "Footprint",
            Self::All => "All",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module behavior flags consumed by selection and scheduling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFlags {
    /// Module never contacts the target directly.
    pub passive: bool,
    /// Module requires an API key option to be useful.
    pub needs_api_key: bool,
    /// Module performs probes a target operator could notice.
    pub invasive: bool,
    /// Module tolerates concurrent `handle_event` calls.
    pub thread_safe: bool,
}

/// Human-facing module metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMeta {
    /// Display name.
    pub human_name: String,
    /// One-line summary.
    pub summary: String,
    /// Category label, e.g. `DNS` or `Crawling and Scanning`.
    pub category: String,
    /// Use cases the module participates in.
    pub use_cases: Vec<UseCase>,
}

/// Static description of a module read by the registry and scheduler.
///
/// # Invariants
/// - `watched_events` may contain the `*` wildcard.
/// - Static after module load; the scheduler never mutates descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Stable module identifier.
    pub name: ModuleName,
    /// Human metadata.
    pub meta: ModuleMeta,
    /// Event types the module consumes; `*` accepts everything.
    pub watched_events: Vec<String>,
    /// Event types the module advertises producing.
    pub produced_events: Vec<String>,
    /// Default option values.
    pub opt_defaults: BTreeMap<String, String>,
    /// Option descriptions for configuration surfaces.
    pub opt_descriptions: BTreeMap<String, String>,
    /// Behavior flags.
    pub flags: ModuleFlags,
}

impl ModuleDescriptor {
    /// Returns true when the module watches the given event type.
    #[must_use]
    pub fn watches(&self, event_type: &str) -> bool {
        self.watched_events
            .iter()
            .any(|watched| watched == "*" || watched == event_type)
    }

    /// Returns true when the module advertises producing the given type.
    #[must_use]
    pub fn produces(&self, event_type: &str) -> bool {
        self.produced_events.iter().any(|produced| produced == event_type)
    }

    /// Returns true when the module participates in the use case.
    #[must_use]
    pub fn in_use_case(&self, use_case: UseCase) -> bool {
        use_case == UseCase::All
            || self
                .meta
                .use_cases
                .iter()
                .any(|declared| *declared == use_case || *declared == UseCase::All)
    }
}

/// Module setup errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Option value failed validation.
    #[error("invalid module option {key}: {message}")]
    InvalidOption {
        /// Offending option key.
        key: String,
        /// Validation failure detail.
        message: String,
    },
    /// Required API key option is missing.
    #[error("missing api key option: {0}")]
    MissingApiKey(String),
    /// Module-specific initialization failure.
    #[error("module setup failed: {0}")]
    Failed(String),
}

/// Module event-handling errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - [`ModuleError::Cancelled`] is cooperative shutdown, not a failure.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Recoverable failure; counts against the module's error threshold.
    #[error("module transient error: {0}")]
    Transient(String),
    /// Unrecoverable module failure.
    #[error("module fatal error: {0}")]
    Fatal(String),
    /// Module observed the cancellation flag and returned early.
    #[error("module cancelled")]
    Cancelled,
    /// Event publication was rejected by the engine.
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Framework handle injected into modules.
///
/// One context is bound per (scan, module) pair, so calls need no module
/// identity argument. Every method is safe to call from `handle_event`
/// worker threads.
pub trait ScanContext: Send + Sync {
    /// Returns the scan identifier.
    fn scan_id(&self) -> &ScanId;

    /// Returns the classified scan target.
    fn target(&self) -> &Target;

    /// Looks up an option from the frozen scan snapshot.
    ///
    /// Module-scoped keys shadow global keys.
    fn get_option(&self, key: &str) -> Option<String>;

    /// Returns true once scan cancellation has been requested.
    ///
    /// Modules must check this around blocking work and return promptly with
    /// [`ModuleError::Cancelled`] when set.
    fn is_cancelled(&self) -> bool;

    /// Appends a durable scan log entry attributed to this module.
    fn log(&self, level: LogLevel, message: &str);

    /// Publishes a produced event linked to its source.
    ///
    /// Blocks while the event bus is above its high-water mark.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Publish`] when the bus has shut down or
    /// persistence rejected the event.
    fn notify_listeners(&self, source: &EventHash, draft: EventDraft) -> Result<(), ModuleError>;
}

/// The contract every data-gathering module satisfies.
///
/// Modules keep per-scan state behind interior mutability; `setup` runs once
/// per scan before any delivery, and `handle_event` is invoked at most once
/// per (event hash, module) pair. Unless
/// [`ModuleFlags::thread_safe`] is set, the scheduler serializes
/// `handle_event` calls per module.
pub trait Module: Send + Sync {
    /// Returns the static module descriptor.
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Prepares the module for one scan.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] to exclude the module from the scan; the scan
    /// itself continues.
    fn setup(&self, ctx: &dyn ScanContext) -> Result<(), SetupError>;

    /// Handles one delivered event, publishing any produced events through
    /// the context.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError`]; transient errors count against the module's
    /// error threshold.
    fn handle_event(&self, ctx: &dyn ScanContext, event: &Event) -> Result<(), ModuleError>;
}

// ============================================================================
// SECTION: Module Provider
// ============================================================================

/// Module selection carried by `StartScan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleSelection {
    /// Explicit module names.
    Names(Vec<ModuleName>),
    /// Every module tagged with the use case.
    ByUseCase(UseCase),
}

/// Module resolution errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Selection referenced a module the registry does not know.
    #[error("unknown module: {0}")]
    UnknownModule(String),
    /// Selection referenced an unknown use-case tag.
    #[error("unknown use case: {0}")]
    UnknownUseCase(String),
}

/// Source of fresh module instances for a scan.
///
/// `resolve` returns new instances on every call; module state never leaks
/// across scans.
pub trait ModuleProvider: Send + Sync {
    /// Returns descriptors of every registered module.
    fn descriptors(&self) -> Vec<ModuleDescriptor>;

    /// Resolves a selection to fresh module instances.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the selection names an unknown module or
    /// use case.
    fn resolve(&self, selection: &ModuleSelection) -> Result<Vec<Arc<dyn Module>>, ResolveError>;
}

// ============================================================================
// SECTION: Correlation Runner
// ============================================================================

/// Correlation run errors surfaced through the scheduler seam.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum CorrelationRunError {
    /// Correlation pass failed before producing results.
    #[error("correlation run failed: {0}")]
    Failed(String),
}

/// Seam through which the scheduler triggers correlation after the event
/// phase ends.
pub trait CorrelationRunner: Send + Sync {
    /// Runs all loaded rules over a scan's stored events.
    ///
    /// Returns the number of correlation results written.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationRunError`] when the pass fails as a whole;
    /// individual rule failures are logged and absorbed.
    fn run(&self, scan: &ScanId) -> Result<usize, CorrelationRunError>;
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Mutable rows held for one scan by the in-memory store.
#[derive(Debug, Default, Clone)]
struct ScanRows {
    /// Scan lifecycle row.
    record: Option<ScanRecord>,
    /// Frozen option snapshot.
    options: ScanOptions,
    /// Events keyed by hash.
    events: BTreeMap<EventHash, Event>,
    /// Insertion order of event hashes.
    event_order: Vec<EventHash>,
    /// Witness set backing idempotent inserts.
    seen: BTreeSet<EventHash>,
    /// Module state rows keyed by module name.
    modules: BTreeMap<ModuleName, ModuleState>,
    /// Append-only log entries.
    logs: Vec<LogEntry>,
    /// Correlation results keyed by correlation id.
    correlations: BTreeMap<String, CorrelationRecord>,
}

/// In-memory [`EventStore`] used by tests and embedded runs.
///
/// # Invariants
/// - Mirrors the durable store's idempotence and not-found semantics.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    /// All scans keyed by scan id.
    scans: Mutex<BTreeMap<ScanId, ScanRows>>,
}

impl InMemoryEventStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the scan table, recovering from poisoned locks.
    fn rows(&self) -> std::sync::MutexGuard<'_, BTreeMap<ScanId, ScanRows>> {
        self.scans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventStore for InMemoryEventStore {
    fn create_scan(&self, record: &ScanRecord, options: &ScanOptions) -> Result<(), StoreError> {
        let mut rows = self.rows();
        if rows.contains_key(&record.scan_id) {
            return Err(StoreError::Conflict(format!("scan exists: {}", record.scan_id)));
        }
        let mut scan = ScanRows {
            record: Some(record.clone()),
            options: options.clone(),
            ..ScanRows::default()
        };
        for module in &record.modules {
            scan.modules.insert(module.clone(), ModuleState::pending(module.clone()));
        }
        rows.insert(record.scan_id.clone(), scan);
        Ok(())
    }

    fn insert_event(&self, scan: &ScanId, event: &Event) -> Result<bool, StoreError> {
        let mut rows = self.rows();
        let scan_rows = rows
            .get_mut(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        if scan_rows.seen.contains(&event.hash) {
            return Ok(false);
        }
        scan_rows.seen.insert(event.hash.clone());
        scan_rows.event_order.push(event.hash.clone());
        scan_rows.events.insert(event.hash.clone(), event.clone());
        Ok(true)
    }

    fn set_scan_status(
        &self,
        scan: &ScanId,
        status: ScanStatus,
        started: Option<Timestamp>,
        ended: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows();
        let scan_rows = rows
            .get_mut(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        let record = scan_rows
            .record
            .as_mut()
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        record.status = status;
        if started.is_some() {
            record.started = started;
        }
        if ended.is_some() {
            record.ended = ended;
        }
        Ok(())
    }

    fn update_module_state(&self, scan: &ScanId, state: &ModuleState) -> Result<(), StoreError> {
        let mut rows = self.rows();
        let scan_rows = rows
            .get_mut(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        scan_rows.modules.insert(state.module.clone(), state.clone());
        Ok(())
    }

    fn append_log(&self, scan: &ScanId, entry: &LogEntry) -> Result<(), StoreError> {
        let mut rows = self.rows();
        let scan_rows = rows
            .get_mut(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        scan_rows.logs.push(entry.clone());
        Ok(())
    }

    fn set_false_positive(
        &self,
        scan: &ScanId,
        hashes: &[EventHash],
        flag: bool,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows();
        let scan_rows = rows
            .get_mut(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        let mut updated = 0;
        for hash in hashes {
            if let Some(event) = scan_rows.events.get_mut(hash) {
                event.false_positive = flag;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn write_correlation(
        &self,
        scan: &ScanId,
        record: &CorrelationRecord,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows();
        let scan_rows = rows
            .get_mut(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        for hash in &record.events {
            if !scan_rows.events.contains_key(hash) {
                return Err(StoreError::Invalid(format!(
                    "correlation references unknown event: {hash}"
                )));
            }
        }
        scan_rows
            .correlations
            .insert(record.correlation_id.as_str().to_string(), record.clone());
        Ok(())
    }

    fn delete_scan(&self, scan: &ScanId) -> Result<(), StoreError> {
        let mut rows = self.rows();
        let running = rows
            .get(scan)
            .and_then(|scan_rows| scan_rows.record.as_ref())
            .is_some_and(|record| !record.status.is_terminal()
                && record.status != ScanStatus::Created);
        if running {
            return Err(StoreError::Conflict(format!("scan is running: {scan}")));
        }
        rows.remove(scan)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))
    }

    fn get_scan(&self, scan: &ScanId) -> Result<ScanRecord, StoreError> {
        let rows = self.rows();
        rows.get(scan)
            .and_then(|scan_rows| scan_rows.record.clone())
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))
    }

    fn list_scans(&self) -> Result<Vec<ScanListRow>, StoreError> {
        let rows = self.rows();
        let mut out: Vec<ScanListRow> = rows
            .values()
            .filter_map(|scan_rows| {
                scan_rows.record.as_ref().map(|record| ScanListRow {
                    scan_id: record.scan_id.clone(),
                    name: record.name.clone(),
                    seed_target: record.seed_target.clone(),
                    seed_type: record.seed_type.clone(),
                    created: record.created,
                    status: record.status,
                    event_count: scan_rows.events.len() as u64,
                })
            })
            .collect();
        out.sort_by(|a, b| b.created.partial_cmp(&a.created).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    fn scan_options(&self, scan: &ScanId) -> Result<ScanOptions, StoreError> {
        let rows = self.rows();
        rows.get(scan)
            .map(|scan_rows| scan_rows.options.clone())
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))
    }

    fn module_states(&self, scan: &ScanId) -> Result<Vec<ModuleState>, StoreError> {
        let rows = self.rows();
        rows.get(scan)
            .map(|scan_rows| scan_rows.modules.values().cloned().collect())
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))
    }

    fn summary(&self, scan: &ScanId) -> Result<Vec<SummaryRow>, StoreError> {
        let rows = self.rows();
        let scan_rows = rows
            .get(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        let mut totals: BTreeMap<&str, (u64, BTreeSet<&str>)> = BTreeMap::new();
        for event in scan_rows.events.values() {
            let entry = totals.entry(event.event_type.as_str()).or_default();
            entry.0 += 1;
            entry.1.insert(event.data.as_str());
        }
        Ok(totals
            .into_iter()
            .map(|(key, (total, uniques))| SummaryRow {
                key: key.to_string(),
                description: key.to_string(),
                total,
                unique_total: uniques.len() as u64,
            })
            .collect())
    }

    fn events(&self, scan: &ScanId, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let rows = self.rows();
        let scan_rows = rows
            .get(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        let filtered = scan_rows
            .event_order
            .iter()
            .filter_map(|hash| scan_rows.events.get(hash))
            .filter(|event| {
                query
                    .event_type
                    .as_ref()
                    .is_none_or(|wanted| &event.event_type == wanted)
                    && query.module.as_ref().is_none_or(|wanted| &event.module == wanted)
                    && query.min_risk.is_none_or(|min| event.risk >= min)
                    && query
                        .since
                        .is_none_or(|since| event.generated.as_secs_f64() >= since.as_secs_f64())
            })
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok(filtered)
    }

    fn events_unique(&self, scan: &ScanId, event_type: &str) -> Result<Vec<UniqueRow>, StoreError> {
        let rows = self.rows();
        let scan_rows = rows
            .get(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for event in scan_rows.events.values() {
            if event.event_type == event_type {
                *counts.entry(event.data.as_str()).or_default() += 1;
            }
        }
        let mut out: Vec<UniqueRow> = counts
            .into_iter()
            .map(|(data, count)| UniqueRow {
                data: data.to_string(),
                count,
            })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.data.cmp(&b.data)));
        Ok(out)
    }

    fn all_events(&self, scan: &ScanId) -> Result<Vec<Event>, StoreError> {
        let rows = self.rows();
        let scan_rows = rows
            .get(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        Ok(scan_rows
            .event_order
            .iter()
            .filter_map(|hash| scan_rows.events.get(hash))
            .cloned()
            .collect())
    }

    fn logs(&self, scan: &ScanId, query: &LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        let rows = self.rows();
        let scan_rows = rows
            .get(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        Ok(scan_rows
            .logs
            .iter()
            .rev()
            .filter(|entry| query.level.is_none_or(|level| entry.level == level))
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn viz(&self, scan: &ScanId) -> Result<VizGraph, StoreError> {
        let rows = self.rows();
        let scan_rows = rows
            .get(scan)
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))?;
        let nodes = scan_rows
            .event_order
            .iter()
            .filter_map(|hash| scan_rows.events.get(hash))
            .map(|event| VizNode {
                id: event.hash.clone(),
                event_type: event.event_type.clone(),
                label: event.data.clone(),
                risk: event.risk,
            })
            .collect();
        let edges = scan_rows
            .event_order
            .iter()
            .filter_map(|hash| scan_rows.events.get(hash))
            .filter_map(|event| {
                event.source_hash.as_ref().map(|source| VizEdge {
                    source: source.clone(),
                    target: event.hash.clone(),
                })
            })
            .collect();
        Ok(VizGraph {
            nodes,
            edges,
        })
    }

    fn correlations(&self, scan: &ScanId) -> Result<Vec<CorrelationRecord>, StoreError> {
        let rows = self.rows();
        rows.get(scan)
            .map(|scan_rows| scan_rows.correlations.values().cloned().collect())
            .ok_or_else(|| StoreError::NotFound(format!("scan: {scan}")))
    }
}
