// crates/strix-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Event Store
// Description: Durable EventStore backed by SQLite WAL.
// Purpose: Persist scan rows, events, module state, logs, and correlations.
// Dependencies: strix-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable [`EventStore`] over `SQLite`. All
//! mutations are queued to a single writer thread which batches commands into
//! transactions, so writes within a scan keep stable ordering and the unique
//! `(scan_id, hash)` witness makes event inserts idempotent. Reads run on a
//! small pool of read-only connections selected round-robin.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::Sender;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::TrySendError;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use strix_core::CorrelationId;
use strix_core::CorrelationRecord;
use strix_core::Event;
use strix_core::EventHash;
use strix_core::EventQuery;
use strix_core::EventStore;
use strix_core::LogEntry;
use strix_core::LogLevel;
use strix_core::LogQuery;
use strix_core::ModuleName;
use strix_core::ModuleState;
use strix_core::ModuleStatus;
use strix_core::OPTION_KEY_SEPARATOR;
use strix_core::RuleDescriptor;
use strix_core::RuleRisk;
use strix_core::ScanId;
use strix_core::ScanListRow;
use strix_core::ScanOptions;
use strix_core::ScanRecord;
use strix_core::ScanStatus;
use strix_core::StoreError;
use strix_core::SummaryRow;
use strix_core::Timestamp;
use strix_core::UniqueRow;
use strix_core::VizEdge;
use strix_core::VizGraph;
use strix_core::VizNode;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Busy timeout sized for the insert bursts a running scan produces.
const SCAN_WRITE_BUSY_TIMEOUT_MS: u64 = 10_000;
/// Scan config component used for unscoped option keys.
const GLOBAL_COMPONENT: &str = "GLOBAL";
/// Upper bound on waiting for a writer response.
const WRITER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Config
// ============================================================================

/// Durability profile applied to the event database.
///
/// Scans write far more often than operators read, so the profile picks the
/// journal and synchronous pragmas as a pair instead of exposing each knob.
///
/// # Invariants
/// - Each profile maps to a fixed `(journal_mode, synchronous)` pragma pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityProfile {
    /// WAL journal with normal sync; keeps up with a live scan's event bursts.
    #[default]
    ScanOptimized,
    /// WAL journal with full sync; for installs that keep scan archives and
    /// accept slower event writes.
    Archival,
    /// Rollback journal with full sync; for filesystems where WAL is
    /// unavailable.
    Compat,
}

impl DurabilityProfile {
    /// Returns the `journal_mode` pragma value for this profile.
    #[must_use]
    pub const fn journal_pragma(self) -> &'static str {
        match self {
            Self::ScanOptimized | Self::Archival => "wal",
            Self::Compat => "delete",
        }
    }

    /// Returns the `synchronous` pragma value for this profile.
    #[must_use]
    pub const fn sync_pragma(self) -> &'static str {
        match self {
            Self::ScanOptimized => "normal",
            Self::Archival | Self::Compat => "full",
        }
    }
}

/// Configuration for the `SQLite` event store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - Queue, batch, and reader limits must be greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_scan_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Durability profile for the database.
    #[serde(default)]
    pub durability: DurabilityProfile,
    /// Writer queue capacity; sized so a full event-bus drain fits without
    /// pushing backpressure into module workers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum commands folded into one writer transaction.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Window the writer waits to fold more commands into a batch
    /// (milliseconds).
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Number of read-only connections serving the query layer.
    #[serde(default = "default_reader_count")]
    pub reader_count: usize,
}

impl SqliteStoreConfig {
    /// Creates a config for the given path with defaults elsewhere.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_scan_busy_timeout_ms(),
            durability: DurabilityProfile::default(),
            queue_capacity: default_queue_capacity(),
            batch_limit: default_batch_limit(),
            batch_window_ms: default_batch_window_ms(),
            reader_count: default_reader_count(),
        }
    }
}

/// Returns the default busy timeout, tuned for bursty scan writes.
const fn default_scan_busy_timeout_ms() -> u64 {
    SCAN_WRITE_BUSY_TIMEOUT_MS
}

/// Returns the default writer queue capacity; large enough that a full
/// event-bus drain never overflows the queue.
const fn default_queue_capacity() -> usize {
    4_096
}

/// Returns the default per-transaction command cap.
const fn default_batch_limit() -> usize {
    128
}

/// Returns the default batching window; long enough to fold one module's
/// burst of produced events into a single transaction.
const fn default_batch_window_ms() -> u64 {
    5
}

/// Returns the default reader connection count; progress polling and the
/// query layer rarely need more.
const fn default_reader_count() -> usize {
    2
}

/// Validates runtime limits in the store configuration.
fn validate_runtime_limits(config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    if config.queue_capacity == 0 {
        return Err(SqliteStoreError::Invalid(
            "queue_capacity must be greater than zero".to_string(),
        ));
    }
    if config.batch_limit == 0 {
        return Err(SqliteStoreError::Invalid(
            "batch_limit must be greater than zero".to_string(),
        ));
    }
    if config.batch_window_ms == 0 {
        return Err(SqliteStoreError::Invalid(
            "batch_window_ms must be greater than zero".to_string(),
        ));
    }
    if config.reader_count == 0 {
        return Err(SqliteStoreError::Invalid(
            "reader_count must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw event payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Database is busy or locked; retriable.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Referenced row does not exist.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Operation conflicts with current scan state.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// Writer queue is saturated and the caller should retry.
    #[error("sqlite store overloaded: {message}")]
    Overloaded {
        /// Retryable overload message.
        message: String,
        /// Suggested retry delay in milliseconds.
        retry_after_ms: u64,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Db(message),
            SqliteStoreError::Busy(message) => Self::Transient {
                message,
                retry_after_ms: Some(SCAN_WRITE_BUSY_TIMEOUT_MS / 10),
            },
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::Overloaded {
                message,
                retry_after_ms,
            } => Self::Transient {
                message,
                retry_after_ms: Some(retry_after_ms),
            },
        }
    }
}

/// Classifies a `rusqlite` error into a store error.
fn classify(error: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = error {
        if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
            return SqliteStoreError::Busy(
                message.clone().unwrap_or_else(|| "database busy".to_string()),
            );
        }
    }
    SqliteStoreError::Db(error.to_string())
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Idempotent schema creation statements.
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scan_instance (
        scan_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        seed_target TEXT NOT NULL,
        seed_type TEXT NOT NULL,
        created REAL NOT NULL,
        started REAL,
        ended REAL,
        status TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scan_config (
        scan_id TEXT NOT NULL,
        component TEXT NOT NULL,
        opt TEXT NOT NULL,
        val TEXT NOT NULL,
        PRIMARY KEY (scan_id, component, opt)
    )",
    "CREATE TABLE IF NOT EXISTS scan_event (
        scan_id TEXT NOT NULL,
        hash TEXT NOT NULL,
        type TEXT NOT NULL,
        generated REAL NOT NULL,
        confidence INTEGER NOT NULL,
        visibility INTEGER NOT NULL,
        risk INTEGER NOT NULL,
        module TEXT NOT NULL,
        data TEXT NOT NULL,
        source_hash TEXT,
        false_positive INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (scan_id, hash)
    )",
    "CREATE INDEX IF NOT EXISTS idx_scan_event_type ON scan_event (scan_id, type)",
    "CREATE INDEX IF NOT EXISTS idx_scan_event_source ON scan_event (scan_id, source_hash)",
    "CREATE TABLE IF NOT EXISTS scan_event_seen (
        scan_id TEXT NOT NULL,
        hash TEXT NOT NULL,
        PRIMARY KEY (scan_id, hash)
    )",
    "CREATE TABLE IF NOT EXISTS module_state (
        scan_id TEXT NOT NULL,
        module TEXT NOT NULL,
        status TEXT NOT NULL,
        events_produced INTEGER NOT NULL DEFAULT 0,
        started REAL,
        ended REAL,
        PRIMARY KEY (scan_id, module)
    )",
    "CREATE TABLE IF NOT EXISTS scan_log (
        scan_id TEXT NOT NULL,
        generated REAL NOT NULL,
        component TEXT NOT NULL,
        type TEXT NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_scan_log_scan ON scan_log (scan_id)",
    "CREATE TABLE IF NOT EXISTS tbl_scan_correlation_results (
        scan_id TEXT NOT NULL,
        correlation_id TEXT PRIMARY KEY,
        rule_id TEXT NOT NULL,
        rule_name TEXT NOT NULL,
        rule_descr TEXT NOT NULL,
        rule_risk TEXT NOT NULL,
        rule_logic TEXT NOT NULL,
        title TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tbl_scan_correlation_results_events (
        correlation_id TEXT NOT NULL,
        event_hash TEXT NOT NULL,
        PRIMARY KEY (correlation_id, event_hash)
    )",
];

/// Applies the idempotent schema to a connection.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    for statement in SCHEMA_STATEMENTS {
        connection
            .execute(statement, [])
            .map_err(|err| classify(&err))?;
    }
    Ok(())
}

/// Opens a connection with the configured pragmas.
fn open_connection(
    config: &SqliteStoreConfig,
    read_only: bool,
) -> Result<Connection, SqliteStoreError> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| classify(&err))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| classify(&err))?;
    if !read_only {
        // Journal and sync pragmas require write access; readers inherit the
        // journal mode the writer established.
        connection
            .pragma_update(None, "journal_mode", config.durability.journal_pragma())
            .map_err(|err| classify(&err))?;
        connection
            .pragma_update(None, "synchronous", config.durability.sync_pragma())
            .map_err(|err| classify(&err))?;
        connection
            .pragma_update(None, "foreign_keys", "on")
            .map_err(|err| classify(&err))?;
    }
    Ok(connection)
}

/// Ensures the database parent directory exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Writer Commands
// ============================================================================

/// Command envelope queued to the writer thread.
enum WriterCommand {
    /// Create the scan row, option snapshot, and pending module rows.
    CreateScan {
        /// Scan lifecycle row.
        record: ScanRecord,
        /// Frozen option snapshot.
        options: ScanOptions,
        /// Result channel.
        response: Sender<Result<(), SqliteStoreError>>,
    },
    /// Insert one event, idempotent on the seen witness.
    InsertEvent {
        /// Owning scan.
        scan: ScanId,
        /// Event row.
        event: Event,
        /// Result channel carrying the inserted flag.
        response: Sender<Result<bool, SqliteStoreError>>,
    },
    /// Update the scan lifecycle row.
    SetScanStatus {
        /// Owning scan.
        scan: ScanId,
        /// New status.
        status: ScanStatus,
        /// Optional event-phase start time.
        started: Option<Timestamp>,
        /// Optional terminal time.
        ended: Option<Timestamp>,
        /// Result channel.
        response: Sender<Result<(), SqliteStoreError>>,
    },
    /// Upsert one module state row.
    UpdateModuleState {
        /// Owning scan.
        scan: ScanId,
        /// State row.
        state: ModuleState,
        /// Result channel.
        response: Sender<Result<(), SqliteStoreError>>,
    },
    /// Append one durable log entry.
    AppendLog {
        /// Owning scan.
        scan: ScanId,
        /// Log entry.
        entry: LogEntry,
        /// Result channel.
        response: Sender<Result<(), SqliteStoreError>>,
    },
    /// Set or clear the false positive flag on hashes.
    SetFalsePositive {
        /// Owning scan.
        scan: ScanId,
        /// Target hashes.
        hashes: Vec<EventHash>,
        /// New flag value.
        flag: bool,
        /// Result channel carrying the updated row count.
        response: Sender<Result<u64, SqliteStoreError>>,
    },
    /// Write one correlation result and its event links.
    WriteCorrelation {
        /// Owning scan.
        scan: ScanId,
        /// Correlation record.
        record: CorrelationRecord,
        /// Result channel.
        response: Sender<Result<(), SqliteStoreError>>,
    },
    /// Delete every row belonging to a scan.
    DeleteScan {
        /// Target scan.
        scan: ScanId,
        /// Result channel.
        response: Sender<Result<(), SqliteStoreError>>,
    },
}

/// Result of one applied command, held until the batch commits.
enum Applied {
    /// Unit-result command.
    Unit(Sender<Result<(), SqliteStoreError>>, Result<(), SqliteStoreError>),
    /// Inserted-flag command.
    Flag(Sender<Result<bool, SqliteStoreError>>, Result<bool, SqliteStoreError>),
    /// Updated-count command.
    Count(Sender<Result<u64, SqliteStoreError>>, Result<u64, SqliteStoreError>),
}

impl Applied {
    /// Sends the stored result, overridden by a batch-level failure.
    fn send(self, batch_failure: Option<&SqliteStoreError>) {
        match self {
            Self::Unit(sender, result) => {
                let result = batch_failure.map_or(result, |err| Err(err.clone()));
                let _ = sender.send(result);
            }
            Self::Flag(sender, result) => {
                let result = batch_failure.map_or(result, |err| Err(err.clone()));
                let _ = sender.send(result);
            }
            Self::Count(sender, result) => {
                let result = batch_failure.map_or(result, |err| Err(err.clone()));
                let _ = sender.send(result);
            }
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed event store with WAL support.
///
/// # Invariants
/// - All mutations flow through the writer thread in submission order.
/// - Read connections never write.
#[derive(Clone)]
pub struct SqliteEventStore {
    /// Writer queue sender.
    writer: SyncSender<WriterCommand>,
    /// Approximate writer queue depth for telemetry.
    pending_depth: Arc<AtomicUsize>,
    /// Suggested retry delay returned on overload.
    retry_after_ms: u64,
    /// Read-only connection pool.
    read_connections: Arc<Vec<Mutex<Connection>>>,
    /// Round-robin cursor for read connection selection.
    read_cursor: Arc<AtomicUsize>,
}

impl SqliteEventStore {
    /// Opens an `SQLite`-backed event store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_runtime_limits(&config)?;
        ensure_parent_dir(&config.path)?;
        let write_connection = open_connection(&config, false)?;
        initialize_schema(&write_connection)?;
        let mut read_connections = Vec::with_capacity(config.reader_count);
        for _ in 0 .. config.reader_count {
            read_connections.push(Mutex::new(open_connection(&config, true)?));
        }
        let (sender, receiver) = mpsc::sync_channel(config.queue_capacity);
        let pending_depth = Arc::new(AtomicUsize::new(0));
        spawn_writer(&config, write_connection, receiver, Arc::clone(&pending_depth))?;
        Ok(Self {
            writer: sender,
            pending_depth,
            retry_after_ms: config.batch_window_ms.max(1),
            read_connections: Arc::new(read_connections),
            read_cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Returns the approximate writer queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.pending_depth.load(Ordering::Acquire)
    }

    /// Submits a command to the writer queue.
    fn submit(&self, command: WriterCommand) -> Result<(), SqliteStoreError> {
        self.pending_depth.fetch_add(1, Ordering::AcqRel);
        match self.writer.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.pending_depth.fetch_sub(1, Ordering::AcqRel);
                Err(SqliteStoreError::Overloaded {
                    message: "writer queue full".to_string(),
                    retry_after_ms: self.retry_after_ms,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending_depth.fetch_sub(1, Ordering::AcqRel);
                Err(SqliteStoreError::Io("writer thread stopped".to_string()))
            }
        }
    }

    /// Waits for a writer response with a hard upper bound.
    fn wait<T>(receiver: &Receiver<Result<T, SqliteStoreError>>) -> Result<T, SqliteStoreError> {
        match receiver.recv_timeout(WRITER_RESPONSE_TIMEOUT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(SqliteStoreError::Db("writer response timed out".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(SqliteStoreError::Io("writer thread stopped".to_string()))
            }
        }
    }

    /// Picks a read connection round-robin and runs the closure against it.
    fn with_read<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, SqliteStoreError> {
        let index = self.read_cursor.fetch_add(1, Ordering::AcqRel) % self.read_connections.len();
        let guard = self.read_connections[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        op(&guard).map_err(|err| classify(&err))
    }
}

// ============================================================================
// SECTION: Writer Thread
// ============================================================================

/// Spawns the writer runtime thread.
fn spawn_writer(
    config: &SqliteStoreConfig,
    mut connection: Connection,
    receiver: Receiver<WriterCommand>,
    pending_depth: Arc<AtomicUsize>,
) -> Result<(), SqliteStoreError> {
    let batch_limit = config.batch_limit;
    let batch_window = Duration::from_millis(config.batch_window_ms);
    thread::Builder::new()
        .name("strix-sqlite-writer".to_string())
        .spawn(move || {
            while let Ok(first) = receiver.recv() {
                let mut batch = vec![first];
                let deadline = Instant::now() + batch_window;
                while batch.len() < batch_limit {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match receiver.recv_timeout(remaining) {
                        Ok(command) => batch.push(command),
                        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
                    }
                }
                let size = batch.len();
                execute_batch(&mut connection, batch);
                pending_depth.fetch_sub(size, Ordering::AcqRel);
            }
        })
        .map(|_| ())
        .map_err(|err| SqliteStoreError::Io(format!("failed to spawn sqlite writer: {err}")))
}

/// Executes one batch of commands inside a single transaction.
fn execute_batch(connection: &mut Connection, batch: Vec<WriterCommand>) {
    let tx = match connection.transaction() {
        Ok(tx) => tx,
        Err(err) => {
            let failure = classify(&err);
            for command in batch {
                reject(command, &failure);
            }
            return;
        }
    };
    let mut applied = Vec::with_capacity(batch.len());
    for command in batch {
        applied.push(apply(&tx, command));
    }
    let failure = tx.commit().err().map(|err| classify(&err));
    for entry in applied {
        entry.send(failure.as_ref());
    }
}

/// Sends a batch-level failure to a command without applying it.
fn reject(command: WriterCommand, failure: &SqliteStoreError) {
    match command {
        WriterCommand::CreateScan {
            response, ..
        }
        | WriterCommand::SetScanStatus {
            response, ..
        }
        | WriterCommand::UpdateModuleState {
            response, ..
        }
        | WriterCommand::AppendLog {
            response, ..
        }
        | WriterCommand::WriteCorrelation {
            response, ..
        }
        | WriterCommand::DeleteScan {
            response, ..
        } => {
            let _ = response.send(Err(failure.clone()));
        }
        WriterCommand::InsertEvent {
            response, ..
        } => {
            let _ = response.send(Err(failure.clone()));
        }
        WriterCommand::SetFalsePositive {
            response, ..
        } => {
            let _ = response.send(Err(failure.clone()));
        }
    }
}

/// Applies one command within the batch transaction.
fn apply(tx: &Transaction<'_>, command: WriterCommand) -> Applied {
    match command {
        WriterCommand::CreateScan {
            record,
            options,
            response,
        } => Applied::Unit(response, apply_create_scan(tx, &record, &options)),
        WriterCommand::InsertEvent {
            scan,
            event,
            response,
        } => Applied::Flag(response, apply_insert_event(tx, &scan, &event)),
        WriterCommand::SetScanStatus {
            scan,
            status,
            started,
            ended,
            response,
        } => Applied::Unit(response, apply_set_status(tx, &scan, status, started, ended)),
        WriterCommand::UpdateModuleState {
            scan,
            state,
            response,
        } => Applied::Unit(response, apply_module_state(tx, &scan, &state)),
        WriterCommand::AppendLog {
            scan,
            entry,
            response,
        } => Applied::Unit(response, apply_append_log(tx, &scan, &entry)),
        WriterCommand::SetFalsePositive {
            scan,
            hashes,
            flag,
            response,
        } => Applied::Count(response, apply_false_positive(tx, &scan, &hashes, flag)),
        WriterCommand::WriteCorrelation {
            scan,
            record,
            response,
        } => Applied::Unit(response, apply_correlation(tx, &scan, &record)),
        WriterCommand::DeleteScan {
            scan,
            response,
        } => Applied::Unit(response, apply_delete_scan(tx, &scan)),
    }
}

/// Writes the scan row, config snapshot, and pending module rows.
fn apply_create_scan(
    tx: &Transaction<'_>,
    record: &ScanRecord,
    options: &ScanOptions,
) -> Result<(), SqliteStoreError> {
    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO scan_instance
             (scan_id, name, seed_target, seed_type, created, started, ended, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.scan_id.as_str(),
                record.name,
                record.seed_target,
                record.seed_type,
                record.created.as_secs_f64(),
                record.started.map(Timestamp::as_secs_f64),
                record.ended.map(Timestamp::as_secs_f64),
                record.status.as_str(),
            ],
        )
        .map_err(|err| classify(&err))?;
    if inserted == 0 {
        return Err(SqliteStoreError::Conflict(format!("scan exists: {}", record.scan_id)));
    }
    for (key, value) in options.iter() {
        let (component, opt) = match key.split_once(OPTION_KEY_SEPARATOR) {
            Some((component, opt)) => (component, opt),
            None => (GLOBAL_COMPONENT, key),
        };
        tx.execute(
            "INSERT OR REPLACE INTO scan_config (scan_id, component, opt, val)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.scan_id.as_str(), component, opt, value],
        )
        .map_err(|err| classify(&err))?;
    }
    for module in &record.modules {
        tx.execute(
            "INSERT OR IGNORE INTO module_state (scan_id, module, status, events_produced)
             VALUES (?1, ?2, ?3, 0)",
            params![record.scan_id.as_str(), module.as_str(), ModuleStatus::Pending.as_str()],
        )
        .map_err(|err| classify(&err))?;
    }
    Ok(())
}

/// Inserts one event behind the seen witness.
fn apply_insert_event(
    tx: &Transaction<'_>,
    scan: &ScanId,
    event: &Event,
) -> Result<bool, SqliteStoreError> {
    let witnessed = tx
        .execute(
            "INSERT OR IGNORE INTO scan_event_seen (scan_id, hash) VALUES (?1, ?2)",
            params![scan.as_str(), event.hash.as_str()],
        )
        .map_err(|err| classify(&err))?;
    if witnessed == 0 {
        return Ok(false);
    }
    tx.execute(
        "INSERT OR IGNORE INTO scan_event
         (scan_id, hash, type, generated, confidence, visibility, risk, module, data,
          source_hash, false_positive)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            scan.as_str(),
            event.hash.as_str(),
            event.event_type,
            event.generated.as_secs_f64(),
            event.confidence,
            event.visibility,
            event.risk,
            event.module.as_str(),
            event.data,
            event.source_hash.as_ref().map(EventHash::as_str),
            i64::from(event.false_positive),
        ],
    )
    .map_err(|err| classify(&err))?;
    Ok(true)
}

/// Updates the scan lifecycle row.
fn apply_set_status(
    tx: &Transaction<'_>,
    scan: &ScanId,
    status: ScanStatus,
    started: Option<Timestamp>,
    ended: Option<Timestamp>,
) -> Result<(), SqliteStoreError> {
    let changed = tx
        .execute(
            "UPDATE scan_instance SET status = ?2,
             started = COALESCE(?3, started),
             ended = COALESCE(?4, ended)
             WHERE scan_id = ?1",
            params![
                scan.as_str(),
                status.as_str(),
                started.map(Timestamp::as_secs_f64),
                ended.map(Timestamp::as_secs_f64),
            ],
        )
        .map_err(|err| classify(&err))?;
    if changed == 0 {
        return Err(SqliteStoreError::NotFound(format!("scan: {scan}")));
    }
    Ok(())
}

/// Upserts one module state row.
fn apply_module_state(
    tx: &Transaction<'_>,
    scan: &ScanId,
    state: &ModuleState,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO module_state (scan_id, module, status, events_produced, started, ended)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (scan_id, module) DO UPDATE SET
             status = excluded.status,
             events_produced = excluded.events_produced,
             started = excluded.started,
             ended = excluded.ended",
        params![
            scan.as_str(),
            state.module.as_str(),
            state.status.as_str(),
            i64::try_from(state.events_produced).unwrap_or(i64::MAX),
            state.started.map(Timestamp::as_secs_f64),
            state.ended.map(Timestamp::as_secs_f64),
        ],
    )
    .map_err(|err| classify(&err))?;
    Ok(())
}

/// Appends one log row.
fn apply_append_log(
    tx: &Transaction<'_>,
    scan: &ScanId,
    entry: &LogEntry,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO scan_log (scan_id, generated, component, type, message)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            scan.as_str(),
            entry.generated.as_secs_f64(),
            entry.component,
            entry.level.as_str(),
            entry.message,
        ],
    )
    .map_err(|err| classify(&err))?;
    Ok(())
}

/// Sets the false positive flag on the given hashes.
fn apply_false_positive(
    tx: &Transaction<'_>,
    scan: &ScanId,
    hashes: &[EventHash],
    flag: bool,
) -> Result<u64, SqliteStoreError> {
    let known: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM scan_instance WHERE scan_id = ?1",
            params![scan.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| classify(&err))?;
    if known.is_none() {
        return Err(SqliteStoreError::NotFound(format!("scan: {scan}")));
    }
    let mut updated = 0u64;
    for hash in hashes {
        let changed = tx
            .execute(
                "UPDATE scan_event SET false_positive = ?3
                 WHERE scan_id = ?1 AND hash = ?2",
                params![scan.as_str(), hash.as_str(), i64::from(flag)],
            )
            .map_err(|err| classify(&err))?;
        updated += changed as u64;
    }
    Ok(updated)
}

/// Writes one correlation result and its event links.
fn apply_correlation(
    tx: &Transaction<'_>,
    scan: &ScanId,
    record: &CorrelationRecord,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT OR REPLACE INTO tbl_scan_correlation_results
         (scan_id, correlation_id, rule_id, rule_name, rule_descr, rule_risk, rule_logic, title)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            scan.as_str(),
            record.correlation_id.as_str(),
            record.rule.rule_id,
            record.rule.name,
            record.rule.description,
            record.rule.risk.as_str(),
            record.rule.logic,
            record.title,
        ],
    )
    .map_err(|err| classify(&err))?;
    for hash in &record.events {
        tx.execute(
            "INSERT OR IGNORE INTO tbl_scan_correlation_results_events
             (correlation_id, event_hash) VALUES (?1, ?2)",
            params![record.correlation_id.as_str(), hash.as_str()],
        )
        .map_err(|err| classify(&err))?;
    }
    Ok(())
}

/// Deletes every row belonging to a scan.
fn apply_delete_scan(tx: &Transaction<'_>, scan: &ScanId) -> Result<(), SqliteStoreError> {
    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM scan_instance WHERE scan_id = ?1",
            params![scan.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| classify(&err))?;
    let Some(status) = status else {
        return Err(SqliteStoreError::NotFound(format!("scan: {scan}")));
    };
    let parsed = ScanStatus::parse(&status)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if !parsed.is_terminal() && parsed != ScanStatus::Created {
        return Err(SqliteStoreError::Conflict(format!("scan is running: {scan}")));
    }
    tx.execute(
        "DELETE FROM tbl_scan_correlation_results_events WHERE correlation_id IN
         (SELECT correlation_id FROM tbl_scan_correlation_results WHERE scan_id = ?1)",
        params![scan.as_str()],
    )
    .map_err(|err| classify(&err))?;
    for table in [
        "tbl_scan_correlation_results",
        "scan_log",
        "module_state",
        "scan_event_seen",
        "scan_event",
        "scan_config",
        "scan_instance",
    ] {
        tx.execute(
            &format!("DELETE FROM {table} WHERE scan_id = ?1"),
            params![scan.as_str()],
        )
        .map_err(|err| classify(&err))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Decodes one `scan_event` row.
fn decode_event(row: &rusqlite::Row<'_>) -> Result<Event, rusqlite::Error> {
    let hash: String = row.get("hash")?;
    let source_hash: Option<String> = row.get("source_hash")?;
    let module: String = row.get("module")?;
    let generated: f64 = row.get("generated")?;
    let false_positive: i64 = row.get("false_positive")?;
    Ok(Event {
        hash: EventHash::parse(&hash).map_err(|_| rusqlite::Error::InvalidQuery)?,
        event_type: row.get("type")?,
        data: row.get("data")?,
        module: ModuleName::parse(&module).map_err(|_| rusqlite::Error::InvalidQuery)?,
        generated: Timestamp::from_epoch_secs(generated),
        source_hash: source_hash
            .map(|raw| EventHash::parse(&raw).map_err(|_| rusqlite::Error::InvalidQuery))
            .transpose()?,
        confidence: row.get("confidence")?,
        visibility: row.get("visibility")?,
        risk: row.get("risk")?,
        false_positive: false_positive != 0,
    })
}

/// Decodes an optional epoch-seconds column.
fn decode_optional_time(value: Option<f64>) -> Option<Timestamp> {
    value.map(Timestamp::from_epoch_secs)
}

// ============================================================================
// SECTION: EventStore Implementation
// ============================================================================

impl EventStore for SqliteEventStore {
    fn create_scan(&self, record: &ScanRecord, options: &ScanOptions) -> Result<(), StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::CreateScan {
            record: record.clone(),
            options: options.clone(),
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn insert_event(&self, scan: &ScanId, event: &Event) -> Result<bool, StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::InsertEvent {
            scan: scan.clone(),
            event: event.clone(),
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn set_scan_status(
        &self,
        scan: &ScanId,
        status: ScanStatus,
        started: Option<Timestamp>,
        ended: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::SetScanStatus {
            scan: scan.clone(),
            status,
            started,
            ended,
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn update_module_state(&self, scan: &ScanId, state: &ModuleState) -> Result<(), StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::UpdateModuleState {
            scan: scan.clone(),
            state: state.clone(),
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn append_log(&self, scan: &ScanId, entry: &LogEntry) -> Result<(), StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::AppendLog {
            scan: scan.clone(),
            entry: entry.clone(),
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn set_false_positive(
        &self,
        scan: &ScanId,
        hashes: &[EventHash],
        flag: bool,
    ) -> Result<u64, StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::SetFalsePositive {
            scan: scan.clone(),
            hashes: hashes.to_vec(),
            flag,
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn write_correlation(
        &self,
        scan: &ScanId,
        record: &CorrelationRecord,
    ) -> Result<(), StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::WriteCorrelation {
            scan: scan.clone(),
            record: record.clone(),
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn delete_scan(&self, scan: &ScanId) -> Result<(), StoreError> {
        let (tx, rx) = mpsc::channel();
        self.submit(WriterCommand::DeleteScan {
            scan: scan.clone(),
            response: tx,
        })?;
        Ok(Self::wait(&rx)?)
    }

    fn get_scan(&self, scan: &ScanId) -> Result<ScanRecord, StoreError> {
        let record = self.with_read(|connection| {
            let row = connection
                .query_row(
                    "SELECT scan_id, name, seed_target, seed_type, created, started, ended, status
                     FROM scan_instance WHERE scan_id = ?1",
                    params![scan.as_str()],
                    |row| {
                        let scan_id: String = row.get(0)?;
                        let created: f64 = row.get(4)?;
                        let started: Option<f64> = row.get(5)?;
                        let ended: Option<f64> = row.get(6)?;
                        let status: String = row.get(7)?;
                        Ok((
                            scan_id,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            created,
                            started,
                            ended,
                            status,
                        ))
                    },
                )
                .optional()?;
            let modules = {
                let mut statement = connection.prepare(
                    "SELECT module FROM module_state WHERE scan_id = ?1 ORDER BY module",
                )?;
                let rows = statement
                    .query_map(params![scan.as_str()], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<String>, _>>()?
            };
            Ok((row, modules))
        })?;
        let ((scan_id, name, seed_target, seed_type, created, started, ended, status), modules) =
            match record {
                (Some(row), modules) => (row, modules),
                (None, _) => return Err(StoreError::NotFound(format!("scan: {scan}"))),
            };
        let status = ScanStatus::parse(&status).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let modules = modules
            .iter()
            .map(|raw| ModuleName::parse(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let scan_id =
            ScanId::parse(&scan_id).map_err(|err| StoreError::Invalid(err.to_string()))?;
        Ok(ScanRecord {
            scan_id,
            name,
            seed_target,
            seed_type,
            created: Timestamp::from_epoch_secs(created),
            started: decode_optional_time(started),
            ended: decode_optional_time(ended),
            status,
            modules,
        })
    }

    fn list_scans(&self) -> Result<Vec<ScanListRow>, StoreError> {
        let rows = self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT s.scan_id, s.name, s.seed_target, s.seed_type, s.created, s.status,
                        (SELECT COUNT(*) FROM scan_event e WHERE e.scan_id = s.scan_id)
                 FROM scan_instance s ORDER BY s.created DESC",
            )?;
            let rows = statement.query_map([], |row| {
                let scan_id: String = row.get(0)?;
                let created: f64 = row.get(4)?;
                let status: String = row.get(5)?;
                let count: i64 = row.get(6)?;
                Ok((
                    scan_id,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    created,
                    status,
                    count,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        rows.into_iter()
            .map(|(scan_id, name, seed_target, seed_type, created, status, count)| {
                Ok(ScanListRow {
                    scan_id: ScanId::parse(&scan_id)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                    name,
                    seed_target,
                    seed_type,
                    created: Timestamp::from_epoch_secs(created),
                    status: ScanStatus::parse(&status)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                    event_count: u64::try_from(count).unwrap_or(0),
                })
            })
            .collect()
    }

    fn scan_options(&self, scan: &ScanId) -> Result<ScanOptions, StoreError> {
        self.get_scan(scan)?;
        let entries = self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT component, opt, val FROM scan_config WHERE scan_id = ?1",
            )?;
            let rows = statement.query_map(params![scan.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        let mut map = std::collections::BTreeMap::new();
        for (component, opt, val) in entries {
            let key = if component == GLOBAL_COMPONENT {
                opt
            } else {
                format!("{component}{OPTION_KEY_SEPARATOR}{opt}")
            };
            map.insert(key, val);
        }
        Ok(ScanOptions::from_entries(map))
    }

    fn module_states(&self, scan: &ScanId) -> Result<Vec<ModuleState>, StoreError> {
        let rows = self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT module, status, events_produced, started, ended
                 FROM module_state WHERE scan_id = ?1 ORDER BY module",
            )?;
            let rows = statement.query_map(params![scan.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        rows.into_iter()
            .map(|(module, status, produced, started, ended)| {
                Ok(ModuleState {
                    module: ModuleName::parse(&module)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                    status: ModuleStatus::parse(&status)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                    events_produced: u64::try_from(produced).unwrap_or(0),
                    started: decode_optional_time(started),
                    ended: decode_optional_time(ended),
                })
            })
            .collect()
    }

    fn summary(&self, scan: &ScanId) -> Result<Vec<SummaryRow>, StoreError> {
        let rows = self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT type, COUNT(*), COUNT(DISTINCT data)
                 FROM scan_event WHERE scan_id = ?1 GROUP BY type ORDER BY type",
            )?;
            let rows = statement.query_map(params![scan.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(rows
            .into_iter()
            .map(|(key, total, unique_total)| SummaryRow {
                description: key.clone(),
                key,
                total: u64::try_from(total).unwrap_or(0),
                unique_total: u64::try_from(unique_total).unwrap_or(0),
            })
            .collect())
    }

    fn events(&self, scan: &ScanId, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let mut sql = String::from(
            "SELECT hash, type, data, module, generated, source_hash, confidence, visibility,
                    risk, false_positive
             FROM scan_event WHERE scan_id = ?1",
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(scan.as_str().to_string())];
        if let Some(event_type) = &query.event_type {
            values.push(Box::new(event_type.clone()));
            sql.push_str(&format!(" AND type = ?{}", values.len()));
        }
        if let Some(module) = &query.module {
            values.push(Box::new(module.as_str().to_string()));
            sql.push_str(&format!(" AND module = ?{}", values.len()));
        }
        if let Some(min_risk) = query.min_risk {
            values.push(Box::new(i64::from(min_risk)));
            sql.push_str(&format!(" AND risk >= ?{}", values.len()));
        }
        if let Some(since) = query.since {
            values.push(Box::new(since.as_secs_f64()));
            sql.push_str(&format!(" AND generated >= ?{}", values.len()));
        }
        values.push(Box::new(i64::try_from(query.limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" ORDER BY rowid ASC LIMIT ?{}", values.len()));
        values.push(Box::new(i64::try_from(query.offset).unwrap_or(0)));
        sql.push_str(&format!(" OFFSET ?{}", values.len()));
        self.with_read(|connection| {
            let mut statement = connection.prepare(&sql)?;
            let params = rusqlite::params_from_iter(values.iter().map(AsRef::as_ref));
            let rows = statement.query_map(params, |row| decode_event(row))?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .map_err(StoreError::from)
    }

    fn events_unique(&self, scan: &ScanId, event_type: &str) -> Result<Vec<UniqueRow>, StoreError> {
        let rows = self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT data, COUNT(*) FROM scan_event
                 WHERE scan_id = ?1 AND type = ?2
                 GROUP BY data ORDER BY COUNT(*) DESC, data ASC",
            )?;
            let rows = statement.query_map(params![scan.as_str(), event_type], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        Ok(rows
            .into_iter()
            .map(|(data, count)| UniqueRow {
                data,
                count: u64::try_from(count).unwrap_or(0),
            })
            .collect())
    }

    fn all_events(&self, scan: &ScanId) -> Result<Vec<Event>, StoreError> {
        self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT hash, type, data, module, generated, source_hash, confidence, visibility,
                        risk, false_positive
                 FROM scan_event WHERE scan_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = statement.query_map(params![scan.as_str()], |row| decode_event(row))?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .map_err(StoreError::from)
    }

    fn logs(&self, scan: &ScanId, query: &LogQuery) -> Result<Vec<LogEntry>, StoreError> {
        let level = query.level.map(LogLevel::as_str);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT generated, component, type, message FROM scan_log
                 WHERE scan_id = ?1 AND (?2 IS NULL OR type = ?2)
                 ORDER BY rowid DESC LIMIT ?3",
            )?;
            let rows = statement.query_map(params![scan.as_str(), level, limit], |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })?;
        rows.into_iter()
            .map(|(generated, component, level, message)| {
                Ok(LogEntry {
                    generated: Timestamp::from_epoch_secs(generated),
                    component,
                    level: LogLevel::parse(&level)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                    message,
                })
            })
            .collect()
    }

    fn viz(&self, scan: &ScanId) -> Result<VizGraph, StoreError> {
        let (nodes, edges) = self.with_read(|connection| {
            let mut node_statement = connection.prepare(
                "SELECT hash, type, data, risk FROM scan_event
                 WHERE scan_id = ?1 ORDER BY rowid ASC",
            )?;
            let nodes = node_statement
                .query_map(params![scan.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u8>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let mut edge_statement = connection.prepare(
                "SELECT source_hash, hash FROM scan_event
                 WHERE scan_id = ?1 AND source_hash IS NOT NULL ORDER BY rowid ASC",
            )?;
            let edges = edge_statement
                .query_map(params![scan.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((nodes, edges))
        })?;
        let nodes = nodes
            .into_iter()
            .map(|(hash, event_type, data, risk)| {
                Ok(VizNode {
                    id: EventHash::parse(&hash)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                    event_type,
                    label: data,
                    risk,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let edges = edges
            .into_iter()
            .map(|(source, target)| {
                Ok(VizEdge {
                    source: EventHash::parse(&source)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                    target: EventHash::parse(&target)
                        .map_err(|err| StoreError::Invalid(err.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(VizGraph {
            nodes,
            edges,
        })
    }

    fn correlations(&self, scan: &ScanId) -> Result<Vec<CorrelationRecord>, StoreError> {
        let rows = self.with_read(|connection| {
            let mut statement = connection.prepare(
                "SELECT correlation_id, rule_id, rule_name, rule_descr, rule_risk, rule_logic,
                        title
                 FROM tbl_scan_correlation_results WHERE scan_id = ?1 ORDER BY correlation_id",
            )?;
            let heads = statement
                .query_map(params![scan.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let mut link_statement = connection.prepare(
                "SELECT event_hash FROM tbl_scan_correlation_results_events
                 WHERE correlation_id = ?1 ORDER BY event_hash",
            )?;
            let mut out = Vec::with_capacity(heads.len());
            for head in heads {
                let links = link_statement
                    .query_map(params![head.0.as_str()], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                out.push((head, links));
            }
            Ok(out)
        })?;
        rows.into_iter()
            .map(|((id, rule_id, name, descr, risk, logic, title), links)| {
                let events = links
                    .iter()
                    .map(|raw| EventHash::parse(raw))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| StoreError::Invalid(err.to_string()))?;
                Ok(CorrelationRecord {
                    correlation_id: CorrelationId::from_stored(id),
                    rule: RuleDescriptor {
                        rule_id,
                        name,
                        description: descr,
                        risk: RuleRisk::parse(&risk)
                            .map_err(|err| StoreError::Invalid(err.to_string()))?,
                        logic,
                    },
                    title,
                    events,
                })
            })
            .collect()
    }
}
