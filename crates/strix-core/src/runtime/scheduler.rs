// crates/strix-core/src/runtime/scheduler.rs
// ============================================================================
// Module: Strix Scan Scheduler
// Description: Scan lifecycle controller, dispatcher, and progress reads.
// Purpose: Drive a scan from target classification to a terminal state.
// Dependencies: crate::core, crate::interfaces, crate::runtime::{bus, worker}
// ============================================================================

//! ## Overview
//! One dispatcher thread runs per scan. It persists published events, routes
//! them to watching modules, submits module calls to a bounded worker pool,
//! and declares quiescence once nothing is queued, pending, or executing for
//! a grace window. Status transitions follow the lifecycle state machine and
//! are written only by this controller.
//! Invariants:
//! - Each (module, event hash) pair is delivered at most once; the insert
//!   witness suppresses duplicate routing.
//! - Module failures are absorbed; they never surface to callers.
//! - After an abort is requested, no further events are persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

use crate::core::event::Event;
use crate::core::event::EventDraft;
use crate::core::event::ROOT_MODULE;
use crate::core::identifiers::EventHash;
use crate::core::identifiers::ModuleName;
use crate::core::identifiers::ScanId;
use crate::core::options::OPTION_KEY_SEPARATOR;
use crate::core::options::ScanOptions;
use crate::core::state::LogEntry;
use crate::core::state::LogLevel;
use crate::core::state::ModuleProgress;
use crate::core::state::ModuleState;
use crate::core::state::ModuleStatus;
use crate::core::state::ProgressSnapshot;
use crate::core::state::ScanRecord;
use crate::core::state::ScanStatus;
use crate::core::target::Target;
use crate::core::target::TargetError;
use crate::core::target::TargetKind;
use crate::core::time::Timestamp;
use crate::interfaces::CorrelationRunner;
use crate::interfaces::EventStore;
use crate::interfaces::Module;
use crate::interfaces::ModuleDescriptor;
use crate::interfaces::ModuleError;
use crate::interfaces::ModuleProvider;
use crate::interfaces::ModuleSelection;
use crate::interfaces::ResolveError;
use crate::interfaces::ScanContext;
use crate::interfaces::StoreError;
use crate::runtime::bus;
use crate::runtime::bus::BusPublisher;
use crate::runtime::worker::WorkerPool;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Dispatcher poll tick.
const DISPATCH_TICK: Duration = Duration::from_millis(25);
/// Base delay between store write retries.
const STORE_RETRY_BASE: Duration = Duration::from_millis(50);
/// Poll interval while waiting for a stop request to complete.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Engine-wide scheduler settings, frozen per process.
///
/// # Invariants
/// - All durations are positive; zero values fall back to defaults at use
///   sites rather than dividing the engine by zero.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Worker threads per scan.
    pub worker_threads: usize,
    /// Bus queue capacity before publishers block.
    pub bus_capacity: usize,
    /// Budget for one `handle_event` call.
    pub module_timeout: Duration,
    /// Bound on the drain period after a stop request.
    pub abort_timeout: Duration,
    /// Transient errors tolerated before a module is excluded.
    pub module_error_threshold: u32,
    /// Idle window required before quiescence is declared.
    pub quiescence_grace: Duration,
    /// Bounded retries for transient store write failures.
    pub store_retry_limit: u32,
    /// Global default options merged into every scan snapshot.
    pub default_options: BTreeMap<String, String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let cores = thread::available_parallelism().map_or(4, std::num::NonZero::get);
        Self {
            worker_threads: cores * 2,
            bus_capacity: 1024,
            module_timeout: Duration::from_secs(60),
            abort_timeout: Duration::from_secs(30),
            module_error_threshold: 5,
            quiescence_grace: Duration::from_millis(250),
            store_retry_limit: 3,
            default_options: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Scheduler operation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Module failures during a scan never surface here.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Target failed classification.
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),
    /// Module selection failed to resolve.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Scan is unknown to the store.
    #[error("scan not found: {0}")]
    NotFound(String),
    /// Operation requires a live scan but the scan is terminal.
    #[error("scan {scan} already terminal: {status}")]
    AlreadyTerminal {
        /// Scan identifier.
        scan: String,
        /// Terminal status observed.
        status: ScanStatus,
    },
    /// Operation requires a stopped scan but the scan is running.
    #[error("scan is running: {0}")]
    ScanRunning(String),
    /// Engine-internal failure.
    #[error("scheduler internal error: {0}")]
    Internal(String),
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Parameters accepted by `start_scan`.
#[derive(Debug, Clone)]
pub struct StartScanRequest {
    /// Display name for the scan.
    pub name: String,
    /// Raw target string.
    pub target: String,
    /// Optional explicit target kind; classified when absent.
    pub target_kind: Option<TargetKind>,
    /// Module selection.
    pub selection: ModuleSelection,
    /// Option overrides applied over engine and module defaults.
    pub option_overrides: BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Handle kept for each scan the scheduler is currently driving.
#[derive(Clone)]
struct ActiveScan {
    /// Scan-wide cancellation flag observed by every module context.
    cancel: Arc<AtomicBool>,
}

/// Scan lifecycle controller.
///
/// # Invariants
/// - Only this controller writes scan status rows.
/// - One dispatcher thread exists per active scan.
pub struct ScanScheduler {
    /// Durable event store shared across scans.
    store: Arc<dyn EventStore>,
    /// Source of fresh module instances.
    provider: Arc<dyn ModuleProvider>,
    /// Optional correlation seam invoked after the event phase.
    correlator: Option<Arc<dyn CorrelationRunner>>,
    /// Engine settings frozen at construction.
    settings: EngineSettings,
    /// Scans currently driven by this process.
    active: Arc<Mutex<BTreeMap<ScanId, ActiveScan>>>,
}

impl ScanScheduler {
    /// Creates a scheduler over the given store and module provider.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        provider: Arc<dyn ModuleProvider>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            provider,
            correlator: None,
            settings,
            active: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Attaches a correlation runner invoked when the event phase ends.
    #[must_use]
    pub fn with_correlator(mut self, correlator: Arc<dyn CorrelationRunner>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    /// Starts a scan and returns its identifier once the scan row exists.
    ///
    /// The event phase runs on a dedicated dispatcher thread; callers observe
    /// progress through [`Self::status`] or [`Self::stream_progress`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] for invalid targets, unknown modules, or
    /// store failures before the scan thread launches.
    pub fn start_scan(&self, request: StartScanRequest) -> Result<ScanId, SchedulerError> {
        let target = match request.target_kind {
            Some(kind) => Target::with_kind(kind, &request.target)?,
            None => Target::classify(&request.target)?,
        };
        let modules = self.provider.resolve(&request.selection)?;
        let scan_id = ScanId::generate();
        let options = self.build_options(&modules, &request.option_overrides);
        let record = ScanRecord {
            scan_id: scan_id.clone(),
            name: request.name,
            seed_target: target.value.clone(),
            seed_type: target.kind.as_str().to_string(),
            created: Timestamp::now(),
            started: None,
            ended: None,
            status: ScanStatus::Created,
            modules: modules.iter().map(|m| m.descriptor().name.clone()).collect(),
        };
        self.store.create_scan(&record, &options)?;
        self.store
            .set_scan_status(&scan_id, ScanStatus::Starting, None, None)?;
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut active = lock_active(&self.active);
            active.insert(scan_id.clone(), ActiveScan {
                cancel: Arc::clone(&cancel),
            });
        }
        let run = ScanRun {
            store: Arc::clone(&self.store),
            correlator: self.correlator.clone(),
            settings: self.settings.clone(),
            active: Arc::clone(&self.active),
            scan_id: scan_id.clone(),
            target,
            options,
            cancel,
        };
        let spawn = thread::Builder::new()
            .name(format!("strix-scan-{scan_id}"))
            .spawn(move || run.run(modules));
        if let Err(err) = spawn {
            lock_active(&self.active).remove(&scan_id);
            let _ = self
                .store
                .set_scan_status(&scan_id, ScanStatus::ErrorFailed, None, Some(Timestamp::now()));
            return Err(SchedulerError::Internal(format!("failed to spawn scan thread: {err}")));
        }
        Ok(scan_id)
    }

    /// Requests a stop and blocks until the scan reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for unknown scans and
    /// [`SchedulerError::AlreadyTerminal`] when the scan has already ended.
    pub fn stop_scan(&self, scan_id: &ScanId) -> Result<ScanStatus, SchedulerError> {
        let handle = lock_active(&self.active).get(scan_id).cloned();
        let Some(handle) = handle else {
            let record = self
                .store
                .get_scan(scan_id)
                .map_err(|_| SchedulerError::NotFound(scan_id.to_string()))?;
            if record.status.is_terminal() {
                return Err(SchedulerError::AlreadyTerminal {
                    scan: scan_id.to_string(),
                    status: record.status,
                });
            }
            return Err(SchedulerError::Internal(format!(
                "scan {scan_id} is not managed by this scheduler"
            )));
        };
        handle.cancel.store(true, Ordering::Release);
        // Abort is cooperative first, forced after abort_timeout; wait a bit
        // past the forced bound before giving up.
        let deadline = Instant::now() + self.settings.abort_timeout + Duration::from_secs(5);
        loop {
            let record = self.store.get_scan(scan_id)?;
            if record.status.is_terminal() {
                return Ok(record.status);
            }
            if Instant::now() >= deadline {
                return Err(SchedulerError::Internal(format!(
                    "scan {scan_id} did not reach a terminal state"
                )));
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }

    /// Deletes a stopped scan's rows.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ScanRunning`] while the scan is active and
    /// [`SchedulerError::NotFound`] for unknown scans.
    pub fn delete_scan(&self, scan_id: &ScanId) -> Result<(), SchedulerError> {
        if lock_active(&self.active).contains_key(scan_id) {
            return Err(SchedulerError::ScanRunning(scan_id.to_string()));
        }
        self.store.delete_scan(scan_id).map_err(|err| match err {
            StoreError::NotFound(_) => SchedulerError::NotFound(scan_id.to_string()),
            StoreError::Conflict(_) => SchedulerError::ScanRunning(scan_id.to_string()),
            other => SchedulerError::Store(other),
        })
    }

    /// Reads a progress snapshot for a scan.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for unknown scans.
    pub fn status(&self, scan_id: &ScanId) -> Result<ProgressSnapshot, SchedulerError> {
        snapshot(self.store.as_ref(), scan_id).map_err(|err| match err {
            StoreError::NotFound(_) => SchedulerError::NotFound(scan_id.to_string()),
            other => SchedulerError::Store(other),
        })
    }

    /// Returns a restartable progress stream polling at `interval`.
    ///
    /// The stream yields a snapshot per tick and terminates after the first
    /// terminal snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for unknown scans.
    pub fn stream_progress(
        &self,
        scan_id: &ScanId,
        interval: Duration,
    ) -> Result<ProgressStream, SchedulerError> {
        // Fail fast on unknown scans; the stream itself tolerates later reads.
        self.status(scan_id)?;
        Ok(ProgressStream {
            store: Arc::clone(&self.store),
            scan_id: scan_id.clone(),
            interval,
            yielded_first: false,
            done: false,
        })
    }

    /// Sets or clears the false positive flag on event hashes.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotFound`] for unknown scans.
    pub fn set_false_positive(
        &self,
        scan_id: &ScanId,
        hashes: &[EventHash],
        flag: bool,
    ) -> Result<u64, SchedulerError> {
        self.store
            .set_false_positive(scan_id, hashes, flag)
            .map_err(|err| match err {
                StoreError::NotFound(_) => SchedulerError::NotFound(scan_id.to_string()),
                other => SchedulerError::Store(other),
            })
    }

    /// Merges engine defaults, module defaults, and caller overrides into the
    /// frozen per-scan option snapshot.
    fn build_options(
        &self,
        modules: &[Arc<dyn Module>],
        overrides: &BTreeMap<String, String>,
    ) -> ScanOptions {
        let mut entries = self.settings.default_options.clone();
        for module in modules {
            let descriptor = module.descriptor();
            for (key, value) in &descriptor.opt_defaults {
                let scoped =
                    format!("{}{}{}", descriptor.name.as_str(), OPTION_KEY_SEPARATOR, key);
                entries.insert(scoped, value.clone());
            }
        }
        for (key, value) in overrides {
            entries.insert(key.clone(), value.clone());
        }
        ScanOptions::from_entries(entries)
    }
}

/// Locks the active-scan table, recovering from poisoned locks.
fn lock_active(
    active: &Arc<Mutex<BTreeMap<ScanId, ActiveScan>>>,
) -> std::sync::MutexGuard<'_, BTreeMap<ScanId, ActiveScan>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SECTION: Progress
// ============================================================================

/// Builds a progress snapshot from stored scan and module state.
fn snapshot(store: &dyn EventStore, scan_id: &ScanId) -> Result<ProgressSnapshot, StoreError> {
    let record = store.get_scan(scan_id)?;
    let states = store.module_states(scan_id)?;
    let modules_total = states.len() as u64;
    let modules_finished = states.iter().filter(|s| s.status.is_terminal()).count() as u64;
    let modules_running =
        states.iter().filter(|s| s.status == ModuleStatus::Running).count() as u64;
    let modules = states
        .into_iter()
        .map(|state| ModuleProgress {
            name: state.module,
            status: state.status,
            events_produced: state.events_produced,
            started_at: state.started,
            finished_at: state.ended,
        })
        .collect();
    Ok(ProgressSnapshot {
        scan_id: scan_id.clone(),
        status: record.status,
        overall_percent: ProgressSnapshot::percent(modules_finished, modules_total),
        modules_total,
        modules_finished,
        modules_running,
        modules,
        timestamp: Timestamp::now(),
    })
}

/// Lazy progress stream over stored scan state.
///
/// # Invariants
/// - Yields at most one terminal snapshot, then ends.
pub struct ProgressStream {
    /// Store read on every tick.
    store: Arc<dyn EventStore>,
    /// Observed scan.
    scan_id: ScanId,
    /// Poll interval between snapshots.
    interval: Duration,
    /// True once the first snapshot has been yielded.
    yielded_first: bool,
    /// True once a terminal snapshot has been yielded.
    done: bool,
}

impl Iterator for ProgressStream {
    type Item = ProgressSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.yielded_first {
            thread::sleep(self.interval);
        }
        self.yielded_first = true;
        match snapshot(self.store.as_ref(), &self.scan_id) {
            Ok(snap) => {
                if snap.status.is_terminal() {
                    self.done = true;
                }
                Some(snap)
            }
            Err(err) => {
                tracing::warn!(scan = %self.scan_id, error = %err, "progress snapshot failed");
                self.done = true;
                None
            }
        }
    }
}

// ============================================================================
// SECTION: Module Context
// ============================================================================

/// Per-(scan, module) framework handle handed to module code.
struct ModuleCtx {
    /// Scan identifier.
    scan_id: ScanId,
    /// Classified scan target.
    target: Target,
    /// Frozen option snapshot.
    options: ScanOptions,
    /// Module this context is bound to.
    module: ModuleName,
    /// Scan-wide cancellation flag.
    scan_cancel: Arc<AtomicBool>,
    /// Per-module cancellation flag set on call timeout or exclusion.
    module_cancel: Arc<AtomicBool>,
    /// Producer half of the scan bus.
    publisher: BusPublisher,
    /// Store used for durable module logs.
    store: Arc<dyn EventStore>,
}

impl ScanContext for ModuleCtx {
    fn scan_id(&self) -> &ScanId {
        &self.scan_id
    }

    fn target(&self) -> &Target {
        &self.target
    }

    fn get_option(&self, key: &str) -> Option<String> {
        self.options.get(&self.module, key).map(ToString::to_string)
    }

    fn is_cancelled(&self) -> bool {
        self.scan_cancel.load(Ordering::Acquire) || self.module_cancel.load(Ordering::Acquire)
    }

    fn log(&self, level: LogLevel, message: &str) {
        let entry = LogEntry::new(self.module.as_str(), level, message);
        if let Err(err) = self.store.append_log(&self.scan_id, &entry) {
            tracing::warn!(scan = %self.scan_id, module = %self.module, error = %err,
                "durable module log write failed");
        }
    }

    fn notify_listeners(&self, source: &EventHash, draft: EventDraft) -> Result<(), ModuleError> {
        let event = draft.into_event(self.module.clone(), source);
        self.publisher
            .publish(event)
            .map_err(|_| ModuleError::Publish("event bus closed".to_string()))
    }
}

// ============================================================================
// SECTION: Store Writer
// ============================================================================

/// Store write wrapper with bounded retry for transient failures.
struct ScanWriter {
    /// Underlying store.
    store: Arc<dyn EventStore>,
    /// Scan all writes belong to.
    scan_id: ScanId,
    /// Maximum retries for transient failures.
    retry_limit: u32,
}

impl ScanWriter {
    /// Runs a store write, retrying transient failures with linear backoff.
    fn run<T>(&self, op: impl Fn() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry_limit => {
                    attempt += 1;
                    thread::sleep(STORE_RETRY_BASE * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Inserts an event, reporting whether the row is new.
    fn insert_event(&self, event: &Event) -> Result<bool, StoreError> {
        self.run(|| self.store.insert_event(&self.scan_id, event))
    }

    /// Writes the scan status row.
    fn set_status(
        &self,
        status: ScanStatus,
        started: Option<Timestamp>,
        ended: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        self.run(|| self.store.set_scan_status(&self.scan_id, status, started, ended))
    }

    /// Upserts one module state row.
    fn update_module_state(&self, state: &ModuleState) -> Result<(), StoreError> {
        self.run(|| self.store.update_module_state(&self.scan_id, state))
    }

    /// Appends a durable scan log entry.
    fn append_log(&self, component: &str, level: LogLevel, message: &str) {
        let entry = LogEntry::new(component, level, message);
        if let Err(err) = self.run(|| self.store.append_log(&self.scan_id, &entry)) {
            tracing::warn!(scan = %self.scan_id, error = %err, "scan log write failed");
        }
    }
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Engine component label used on durable log entries.
const ENGINE_COMPONENT: &str = "strix";

/// Completion message sent from worker jobs back to the dispatcher.
struct Completion {
    /// Index of the module slot the call belonged to.
    slot: usize,
    /// Call outcome.
    result: Result<(), ModuleError>,
}

/// Dispatcher-local state for one module.
struct ModuleSlot {
    /// Module instance.
    module: Arc<dyn Module>,
    /// Cached descriptor.
    descriptor: ModuleDescriptor,
    /// Bound framework context.
    ctx: Arc<ModuleCtx>,
    /// Per-module cancellation flag shared with the context.
    cancel: Arc<AtomicBool>,
    /// Durable module state mirror.
    state: ModuleState,
    /// Events routed but not yet dispatched.
    pending: VecDeque<Event>,
    /// In-flight `handle_event` calls.
    busy: u32,
    /// Start of the oldest outstanding call.
    busy_since: Option<Instant>,
    /// In-flight calls already written off as timed out.
    timed_out_inflight: u32,
    /// Transient error count toward the exclusion threshold.
    errors: u32,
    /// True once the module is off the bus.
    excluded: bool,
}

impl ModuleSlot {
    /// Returns the number of calls this module may run concurrently.
    fn concurrency_limit(&self, worker_threads: usize) -> u32 {
        if self.descriptor.flags.thread_safe {
            u32::try_from(worker_threads.max(1)).unwrap_or(1)
        } else {
            1
        }
    }
}

/// All inputs needed to run one scan's event phase.
struct ScanRun {
    /// Durable event store.
    store: Arc<dyn EventStore>,
    /// Optional correlation seam.
    correlator: Option<Arc<dyn CorrelationRunner>>,
    /// Engine settings.
    settings: EngineSettings,
    /// Active-scan table for self-removal.
    active: Arc<Mutex<BTreeMap<ScanId, ActiveScan>>>,
    /// Scan identifier.
    scan_id: ScanId,
    /// Classified target.
    target: Target,
    /// Frozen option snapshot.
    options: ScanOptions,
    /// Scan-wide cancellation flag.
    cancel: Arc<AtomicBool>,
}

impl ScanRun {
    /// Runs the event phase to a terminal state, then the correlation phase.
    fn run(self, modules: Vec<Arc<dyn Module>>) {
        let writer = ScanWriter {
            store: Arc::clone(&self.store),
            scan_id: self.scan_id.clone(),
            retry_limit: self.settings.store_retry_limit,
        };
        let outcome = self.drive(&writer, modules);
        match outcome {
            Ok(final_status) => {
                if matches!(final_status, ScanStatus::Finished | ScanStatus::Aborted) {
                    self.run_correlations(&writer);
                }
            }
            Err(err) => {
                writer.append_log(
                    ENGINE_COMPONENT,
                    LogLevel::Error,
                    &format!("scan failed: {err}"),
                );
                let _ = self.store.set_scan_status(
                    &self.scan_id,
                    ScanStatus::ErrorFailed,
                    None,
                    Some(Timestamp::now()),
                );
            }
        }
        lock_active(&self.active).remove(&self.scan_id);
    }

    /// Invokes the correlation seam once the event phase has ended.
    fn run_correlations(&self, writer: &ScanWriter) {
        let Some(correlator) = &self.correlator else {
            return;
        };
        match correlator.run(&self.scan_id) {
            Ok(count) => writer.append_log(
                ENGINE_COMPONENT,
                LogLevel::Info,
                &format!("correlation pass produced {count} results"),
            ),
            Err(err) => writer.append_log(
                ENGINE_COMPONENT,
                LogLevel::Error,
                &format!("correlation pass failed: {err}"),
            ),
        }
    }

    /// Event-phase body; returns the terminal status reached.
    fn drive(
        &self,
        writer: &ScanWriter,
        modules: Vec<Arc<dyn Module>>,
    ) -> Result<ScanStatus, StoreError> {
        let (publisher, consumer) = bus::bounded(self.settings.bus_capacity);
        let mut pool = WorkerPool::start(self.scan_id.as_str(), self.settings.worker_threads);
        let (done_tx, done_rx) = mpsc::channel::<Completion>();
        let mut slots = self.build_slots(modules, &publisher);

        // Setup phase: failures exclude the module without blocking the scan.
        for slot in &mut slots {
            match slot.module.setup(slot.ctx.as_ref()) {
                Ok(()) => {
                    slot.state.status = ModuleStatus::Running;
                    slot.state.started = Some(Timestamp::now());
                }
                Err(err) => {
                    writer.append_log(
                        slot.descriptor.name.as_str(),
                        LogLevel::Error,
                        &format!("module setup failed: {err}"),
                    );
                    slot.state.status = ModuleStatus::Errored;
                    slot.state.ended = Some(Timestamp::now());
                    slot.excluded = true;
                    slot.cancel.store(true, Ordering::Release);
                }
            }
            writer.update_module_state(&slot.state)?;
        }

        let mut status = ScanStatus::Starting;
        status = self.transition(writer, status, ScanStatus::Running, Some(Timestamp::now()), None)?;
        writer.append_log(
            ENGINE_COMPONENT,
            LogLevel::Info,
            &format!("scan started against {}", self.target.value),
        );

        // Seed the bus with the synthetic root event.
        let seed = Event::seed(self.target.kind.as_event_type(), &self.target.value);
        self.process_event(writer, &mut slots, &seed)?;

        let mut idle_since: Option<Instant> = None;
        let mut abort_deadline: Option<Instant> = None;
        let final_status = loop {
            while let Ok(completion) = done_rx.try_recv() {
                self.handle_completion(writer, &mut slots, &completion)?;
            }

            if abort_deadline.is_none() && self.cancel.load(Ordering::Acquire) {
                status = self.transition(writer, status, ScanStatus::AbortRequested, None, None)?;
                writer.append_log(ENGINE_COMPONENT, LogLevel::Info, "stop requested; draining");
                consumer.close();
                for slot in &mut slots {
                    slot.pending.clear();
                    slot.cancel.store(true, Ordering::Release);
                }
                abort_deadline = Some(Instant::now() + self.settings.abort_timeout);
            }

            if let Some(event) = consumer.pop(DISPATCH_TICK) {
                if abort_deadline.is_none() {
                    self.process_event(writer, &mut slots, &event)?;
                }
                consumer.routed();
            }

            if let Some(deadline) = abort_deadline {
                let busy: u32 = slots.iter().map(|slot| slot.busy).sum();
                if busy == 0 || Instant::now() >= deadline {
                    self.finalize_modules(writer, &mut slots)?;
                    status = self.transition(
                        writer,
                        status,
                        ScanStatus::Aborted,
                        None,
                        Some(Timestamp::now()),
                    )?;
                    break status;
                }
                continue;
            }

            self.dispatch_ready(&mut slots, &pool, &done_tx);
            self.check_timeouts(writer, &mut slots)?;

            let busy: u32 = slots.iter().map(|slot| slot.busy).sum();
            let pending: usize = slots.iter().map(|slot| slot.pending.len()).sum();
            if busy == 0 && pending == 0 && consumer.depth() == 0 {
                let since = idle_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.settings.quiescence_grace {
                    self.finalize_modules(writer, &mut slots)?;
                    status = self.transition(
                        writer,
                        status,
                        ScanStatus::Finished,
                        None,
                        Some(Timestamp::now()),
                    )?;
                    writer.append_log(ENGINE_COMPONENT, LogLevel::Info, "scan completed");
                    break status;
                }
            } else {
                idle_since = None;
            }
        };

        pool.shutdown(Duration::from_secs(2));
        Ok(final_status)
    }

    /// Advances the lifecycle state machine and mirrors it to the store.
    fn transition(
        &self,
        writer: &ScanWriter,
        current: ScanStatus,
        next: ScanStatus,
        started: Option<Timestamp>,
        ended: Option<Timestamp>,
    ) -> Result<ScanStatus, StoreError> {
        let advanced = current
            .advance(next)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        writer.set_status(advanced, started, ended)?;
        Ok(advanced)
    }

    /// Builds dispatcher slots and bound contexts for the selected modules.
    fn build_slots(
        &self,
        modules: Vec<Arc<dyn Module>>,
        publisher: &BusPublisher,
    ) -> Vec<ModuleSlot> {
        modules
            .into_iter()
            .map(|module| {
                let descriptor = module.descriptor().clone();
                let cancel = Arc::new(AtomicBool::new(false));
                let ctx = Arc::new(ModuleCtx {
                    scan_id: self.scan_id.clone(),
                    target: self.target.clone(),
                    options: self.options.clone(),
                    module: descriptor.name.clone(),
                    scan_cancel: Arc::clone(&self.cancel),
                    module_cancel: Arc::clone(&cancel),
                    publisher: publisher.clone(),
                    store: Arc::clone(&self.store),
                });
                let state = ModuleState::pending(descriptor.name.clone());
                ModuleSlot {
                    module,
                    descriptor,
                    ctx,
                    cancel,
                    state,
                    pending: VecDeque::new(),
                    busy: 0,
                    busy_since: None,
                    timed_out_inflight: 0,
                    errors: 0,
                    excluded: false,
                }
            })
            .collect()
    }

    /// Persists one event and routes it to watching modules.
    ///
    /// Duplicate hashes are persisted idempotently and suppressed on the bus,
    /// which guarantees at-most-once delivery per (module, hash).
    fn process_event(
        &self,
        writer: &ScanWriter,
        slots: &mut [ModuleSlot],
        event: &Event,
    ) -> Result<(), StoreError> {
        let inserted = writer.insert_event(event)?;
        if !inserted {
            return Ok(());
        }
        if event.module.as_str() != ROOT_MODULE {
            if let Some(slot) =
                slots.iter_mut().find(|slot| slot.descriptor.name == event.module)
            {
                slot.state.events_produced += 1;
                writer.update_module_state(&slot.state)?;
                if !slot.descriptor.produces(&event.event_type) {
                    writer.append_log(
                        slot.descriptor.name.as_str(),
                        LogLevel::Warning,
                        &format!("produced undeclared event type {}", event.event_type),
                    );
                }
            }
        }
        for slot in slots.iter_mut() {
            if slot.excluded
                || slot.descriptor.name == event.module
                || !slot.descriptor.watches(&event.event_type)
            {
                continue;
            }
            slot.pending.push_back(event.clone());
        }
        Ok(())
    }

    /// Submits pending events for every module with free capacity.
    fn dispatch_ready(
        &self,
        slots: &mut [ModuleSlot],
        pool: &WorkerPool,
        done_tx: &Sender<Completion>,
    ) {
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.excluded {
                continue;
            }
            let limit = slot.concurrency_limit(self.settings.worker_threads);
            while slot.busy < limit {
                let Some(event) = slot.pending.pop_front() else {
                    break;
                };
                let module = Arc::clone(&slot.module);
                let ctx = Arc::clone(&slot.ctx);
                let done = done_tx.clone();
                let submitted = pool.submit(Box::new(move || {
                    let result = module.handle_event(ctx.as_ref(), &event);
                    let _ = done.send(Completion {
                        slot: index,
                        result,
                    });
                }));
                if !submitted {
                    break;
                }
                if slot.busy == 0 {
                    slot.busy_since = Some(Instant::now());
                }
                slot.busy += 1;
            }
        }
    }

    /// Cancels calls that exceeded the module timeout budget.
    fn check_timeouts(
        &self,
        writer: &ScanWriter,
        slots: &mut [ModuleSlot],
    ) -> Result<(), StoreError> {
        for slot in slots.iter_mut() {
            let Some(since) = slot.busy_since else {
                continue;
            };
            if since.elapsed() < self.settings.module_timeout {
                continue;
            }
            writer.append_log(
                slot.descriptor.name.as_str(),
                LogLevel::Warning,
                &format!(
                    "handle_event exceeded {}s budget; cancelling call",
                    self.settings.module_timeout.as_secs()
                ),
            );
            slot.cancel.store(true, Ordering::Release);
            slot.timed_out_inflight += slot.busy;
            slot.busy_since = None;
            slot.errors += 1;
            if slot.errors > self.settings.module_error_threshold {
                self.exclude(writer, slot)?;
            }
        }
        Ok(())
    }

    /// Applies a worker completion to its module slot.
    fn handle_completion(
        &self,
        writer: &ScanWriter,
        slots: &mut [ModuleSlot],
        completion: &Completion,
    ) -> Result<(), StoreError> {
        let Some(slot) = slots.get_mut(completion.slot) else {
            return Ok(());
        };
        slot.busy = slot.busy.saturating_sub(1);
        slot.busy_since = if slot.busy == 0 {
            None
        } else {
            Some(Instant::now())
        };
        if slot.timed_out_inflight > 0 {
            // The timeout already counted this call; the returned result is
            // stale. Re-arm the per-module cancel token unless excluded.
            slot.timed_out_inflight -= 1;
            if !slot.excluded {
                slot.cancel.store(false, Ordering::Release);
            }
            return Ok(());
        }
        match &completion.result {
            Ok(()) | Err(ModuleError::Cancelled) => {}
            Err(err) => {
                writer.append_log(
                    slot.descriptor.name.as_str(),
                    LogLevel::Error,
                    &format!("handle_event failed: {err}"),
                );
                slot.errors += 1;
                if slot.errors > self.settings.module_error_threshold {
                    self.exclude(writer, slot)?;
                }
            }
        }
        Ok(())
    }

    /// Takes a module off the bus after repeated failures.
    fn exclude(&self, writer: &ScanWriter, slot: &mut ModuleSlot) -> Result<(), StoreError> {
        if slot.excluded {
            return Ok(());
        }
        slot.excluded = true;
        slot.pending.clear();
        slot.cancel.store(true, Ordering::Release);
        slot.state.status = ModuleStatus::Errored;
        slot.state.ended = Some(Timestamp::now());
        writer.update_module_state(&slot.state)?;
        writer.append_log(
            slot.descriptor.name.as_str(),
            LogLevel::Error,
            "error threshold exceeded; module excluded",
        );
        Ok(())
    }

    /// Moves every live module to its terminal state at scan end.
    fn finalize_modules(
        &self,
        writer: &ScanWriter,
        slots: &mut [ModuleSlot],
    ) -> Result<(), StoreError> {
        for slot in slots.iter_mut() {
            if slot.state.status.is_terminal() {
                continue;
            }
            slot.state.status = ModuleStatus::Finished;
            slot.state.ended = Some(Timestamp::now());
            writer.update_module_state(&slot.state)?;
        }
        Ok(())
    }
}
