// crates/strix-core/tests/scheduler_unit.rs
// ============================================================================
// Module: Scan Scheduler Tests
// Description: End-to-end scheduler runs over the in-memory store.
// ============================================================================
//! ## Overview
//! Drives whole scans with stub modules: clean completion, at-most-once
//! delivery, abort mid-scan, module exclusion on repeated errors, module call
//! timeouts, and the empty-selection fast path.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use strix_core::EngineSettings;
use strix_core::Event;
use strix_core::EventDraft;
use strix_core::EventQuery;
use strix_core::EventStore;
use strix_core::InMemoryEventStore;
use strix_core::LogLevel;
use strix_core::LogQuery;
use strix_core::Module;
use strix_core::ModuleDescriptor;
use strix_core::ModuleError;
use strix_core::ModuleFlags;
use strix_core::ModuleMeta;
use strix_core::ModuleName;
use strix_core::ModuleProvider;
use strix_core::ModuleSelection;
use strix_core::ModuleStatus;
use strix_core::ResolveError;
use strix_core::ScanContext;
use strix_core::ScanId;
use strix_core::ScanScheduler;
use strix_core::ScanStatus;
use strix_core::SchedulerError;
use strix_core::SetupError;
use strix_core::StartScanRequest;
use strix_core::UseCase;
use strix_core::event_types;

// ============================================================================
// SECTION: Stub Modules
// ============================================================================

/// Builds a descriptor for a stub module.
fn descriptor(name: &'static str, watched: &[&str], produced: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor {
        name: ModuleName::from_static(name),
        meta: ModuleMeta {
            human_name: name.to_string(),
            summary: "test module".to_string(),
            category: "Test".to_string(),
            use_cases: vec![UseCase::Passive],
        },
        watched_events: watched.iter().map(ToString::to_string).collect(),
        produced_events: produced.iter().map(ToString::to_string).collect(),
        opt_defaults: BTreeMap::new(),
        opt_descriptions: BTreeMap::new(),
        flags: ModuleFlags::default(),
    }
}

/// Emits a fixed set of IP events for every domain it sees.
struct Resolver {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
    /// Addresses to emit.
    addresses: Vec<String>,
}

impl Resolver {
    fn new(name: &'static str, addresses: &[&str]) -> Self {
        Self {
            descriptor: descriptor(
                name,
                &[event_types::DOMAIN_NAME],
                &[event_types::IP_ADDRESS],
            ),
            addresses: addresses.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Module for Resolver {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, _ctx: &dyn ScanContext) -> Result<(), SetupError> {
        Ok(())
    }

    fn handle_event(&self, ctx: &dyn ScanContext, event: &Event) -> Result<(), ModuleError> {
        for address in &self.addresses {
            ctx.notify_listeners(
                &event.hash,
                EventDraft::new(event_types::IP_ADDRESS, address.clone()),
            )?;
        }
        Ok(())
    }
}

/// Counts deliveries per event hash.
struct Counter {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
    /// Deliveries seen, keyed by event hash.
    seen: Arc<Mutex<HashMap<String, usize>>>,
}

impl Module for Counter {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, _ctx: &dyn ScanContext) -> Result<(), SetupError> {
        Ok(())
    }

    fn handle_event(&self, _ctx: &dyn ScanContext, event: &Event) -> Result<(), ModuleError> {
        let mut seen = self.seen.lock().unwrap();
        *seen.entry(event.hash.as_str().to_string()).or_default() += 1;
        Ok(())
    }
}

/// Fails every delivery with a transient error.
struct Failing {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
}

impl Module for Failing {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, _ctx: &dyn ScanContext) -> Result<(), SetupError> {
        Ok(())
    }

    fn handle_event(&self, _ctx: &dyn ScanContext, _event: &Event) -> Result<(), ModuleError> {
        Err(ModuleError::Transient("boom".to_string()))
    }
}

/// Rejects setup outright.
struct BadSetup {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
}

impl Module for BadSetup {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, _ctx: &dyn ScanContext) -> Result<(), SetupError> {
        Err(SetupError::MissingApiKey("api_key".to_string()))
    }

    fn handle_event(&self, _ctx: &dyn ScanContext, _event: &Event) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Emits slowly forever until cancelled.
struct Slow {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
    /// Emission counter shared with the test body.
    emitted: Arc<AtomicUsize>,
}

impl Module for Slow {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, _ctx: &dyn ScanContext) -> Result<(), SetupError> {
        Ok(())
    }

    fn handle_event(&self, ctx: &dyn ScanContext, event: &Event) -> Result<(), ModuleError> {
        for index in 0 .. 10_000 {
            if ctx.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            ctx.notify_listeners(
                &event.hash,
                EventDraft::new(event_types::RAW_DATA, format!("chunk-{index}")),
            )?;
            self.emitted.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

/// Sleeps past the module timeout without checking cancellation.
struct Sleepy {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
}

impl Module for Sleepy {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, _ctx: &dyn ScanContext) -> Result<(), SetupError> {
        Ok(())
    }

    fn handle_event(&self, _ctx: &dyn ScanContext, _event: &Event) -> Result<(), ModuleError> {
        thread::sleep(Duration::from_millis(400));
        Ok(())
    }
}

// ============================================================================
// SECTION: Provider Stub
// ============================================================================

/// Factory producing one fresh module instance per resolve call.
type Factory = Box<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Provider returning a fixed module set regardless of selection.
struct StaticProvider {
    /// Factories producing fresh instances per resolve call.
    factories: Vec<Factory>,
}

impl ModuleProvider for StaticProvider {
    fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.factories.iter().map(|f| f().descriptor().clone()).collect()
    }

    fn resolve(&self, _selection: &ModuleSelection) -> Result<Vec<Arc<dyn Module>>, ResolveError> {
        Ok(self.factories.iter().map(|f| f()).collect())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Settings tuned for fast tests.
fn fast_settings() -> EngineSettings {
    EngineSettings {
        worker_threads: 4,
        bus_capacity: 64,
        module_timeout: Duration::from_secs(10),
        abort_timeout: Duration::from_secs(5),
        module_error_threshold: 1,
        quiescence_grace: Duration::from_millis(100),
        store_retry_limit: 2,
        default_options: BTreeMap::new(),
    }
}

/// Default selection used by tests; the static provider ignores it.
fn any_selection() -> ModuleSelection {
    ModuleSelection::ByUseCase(UseCase::All)
}

/// Blocks until the scan reaches a terminal status.
fn wait_terminal(scheduler: &ScanScheduler, scan_id: &ScanId) -> ScanStatus {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let snap = scheduler.status(scan_id).expect("status");
        if snap.status.is_terminal() {
            return snap.status;
        }
        assert!(Instant::now() < deadline, "scan did not reach a terminal state");
        thread::sleep(Duration::from_millis(25));
    }
}

/// Starts a scan of example.com against the given provider.
fn start(
    scheduler: &ScanScheduler,
) -> ScanId {
    scheduler
        .start_scan(StartScanRequest {
            name: "test scan".to_string(),
            target: "example.com".to_string(),
            target_kind: None,
            selection: any_selection(),
            option_overrides: BTreeMap::new(),
        })
        .expect("start scan")
}

// ============================================================================
// SECTION: Completion
// ============================================================================

#[test]
fn resolver_scan_finishes_with_linked_events() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![Box::new(|| {
            Arc::new(Resolver::new("sfp_stub_resolver", &["93.184.216.34", "93.184.216.35"]))
                as Arc<dyn Module>
        })],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);

    let events = store.all_events(&scan_id).expect("events");
    let seed = events.iter().find(|e| e.source_hash.is_none()).expect("seed");
    assert_eq!(seed.event_type, event_types::DOMAIN_NAME);
    let ips: Vec<_> =
        events.iter().filter(|e| e.event_type == event_types::IP_ADDRESS).collect();
    assert_eq!(ips.len(), 2);
    for ip in ips {
        assert_eq!(ip.source_hash.as_ref(), Some(&seed.hash));
    }

    let states = store.module_states(&scan_id).expect("states");
    assert!(states.iter().all(|s| s.status == ModuleStatus::Finished));
    assert_eq!(states[0].events_produced, 2);

    let snap = scheduler.status(&scan_id).expect("status");
    assert_eq!(snap.overall_percent, 100);
}

#[test]
fn duplicate_events_are_delivered_once() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let seen = Arc::new(Mutex::new(HashMap::new()));
    let seen_clone = Arc::clone(&seen);
    let provider = StaticProvider {
        factories: vec![
            Box::new(|| Arc::new(Resolver::new("sfp_stub_first", &["93.184.216.34"])) as Arc<dyn Module>),
            Box::new(|| Arc::new(Resolver::new("sfp_stub_second", &["93.184.216.34"])) as Arc<dyn Module>),
            Box::new(move || {
                Arc::new(Counter {
                    descriptor: descriptor("sfp_stub_counter", &[event_types::IP_ADDRESS], &[]),
                    seen: Arc::clone(&seen_clone),
                }) as Arc<dyn Module>
            }),
        ],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);

    // Both resolvers emit the same (type, data, source); the hash collapses
    // and the counter sees exactly one delivery.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen.values().all(|count| *count == 1));

    let ip_rows = store
        .events(&scan_id, &EventQuery {
            event_type: Some(event_types::IP_ADDRESS.to_string()),
            ..EventQuery::default()
        })
        .expect("events");
    assert_eq!(ip_rows.len(), 1);
}

#[test]
fn empty_selection_finishes_immediately() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);
    let events = store.all_events(&scan_id).expect("events");
    assert_eq!(events.len(), 1, "only the seed event is persisted");
    let snap = scheduler.status(&scan_id).expect("status");
    assert_eq!(snap.overall_percent, 100);
}

// ============================================================================
// SECTION: Failure Semantics
// ============================================================================

#[test]
fn setup_failure_excludes_module_but_scan_finishes() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![
            Box::new(|| Arc::new(Resolver::new("sfp_stub_resolver", &["93.184.216.34"])) as Arc<dyn Module>),
            Box::new(|| {
                Arc::new(BadSetup {
                    descriptor: descriptor("sfp_stub_badsetup", &["*"], &[]),
                }) as Arc<dyn Module>
            }),
        ],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);

    let states = store.module_states(&scan_id).expect("states");
    let bad = states.iter().find(|s| s.module.as_str() == "sfp_stub_badsetup").expect("row");
    assert_eq!(bad.status, ModuleStatus::Errored);
    let good = states.iter().find(|s| s.module.as_str() == "sfp_stub_resolver").expect("row");
    assert_eq!(good.status, ModuleStatus::Finished);
}

#[test]
fn repeated_errors_exclude_module() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![
            Box::new(|| {
                Arc::new(Resolver::new(
                    "sfp_stub_resolver",
                    &["93.184.216.34", "93.184.216.35", "93.184.216.36"],
                )) as Arc<dyn Module>
            }),
            Box::new(|| {
                Arc::new(Failing {
                    descriptor: descriptor("sfp_stub_failing", &[event_types::IP_ADDRESS], &[]),
                }) as Arc<dyn Module>
            }),
        ],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);

    let states = store.module_states(&scan_id).expect("states");
    let failing =
        states.iter().find(|s| s.module.as_str() == "sfp_stub_failing").expect("row");
    assert_eq!(failing.status, ModuleStatus::Errored);

    let logs = store.logs(&scan_id, &LogQuery::default()).expect("logs");
    assert!(logs.iter().any(|entry| entry.level == LogLevel::Error
        && entry.message.contains("handle_event failed")));
}

#[test]
fn module_timeout_logs_warning() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![Box::new(|| {
            Arc::new(Sleepy {
                descriptor: descriptor("sfp_stub_sleepy", &[event_types::DOMAIN_NAME], &[]),
            }) as Arc<dyn Module>
        })],
    };
    let mut settings = fast_settings();
    settings.module_timeout = Duration::from_millis(100);
    settings.module_error_threshold = 5;
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), settings);
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);

    let logs = store.logs(&scan_id, &LogQuery::default()).expect("logs");
    assert!(logs.iter().any(|entry| entry.level == LogLevel::Warning
        && entry.message.contains("exceeded")));
}

// ============================================================================
// SECTION: Abort
// ============================================================================

#[test]
fn stop_scan_aborts_and_freezes_events() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let emitted = Arc::new(AtomicUsize::new(0));
    let emitted_clone = Arc::clone(&emitted);
    let provider = StaticProvider {
        factories: vec![Box::new(move || {
            Arc::new(Slow {
                descriptor: descriptor(
                    "sfp_stub_slow",
                    &[event_types::DOMAIN_NAME],
                    &[event_types::RAW_DATA],
                ),
                emitted: Arc::clone(&emitted_clone),
            }) as Arc<dyn Module>
        })],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);

    // Let the slow module emit a few events before stopping.
    let deadline = Instant::now() + Duration::from_secs(10);
    while emitted.load(Ordering::SeqCst) < 3 {
        assert!(Instant::now() < deadline, "slow module never emitted");
        thread::sleep(Duration::from_millis(10));
    }
    let status = scheduler.stop_scan(&scan_id).expect("stop");
    assert_eq!(status, ScanStatus::Aborted);

    let count_after_stop = store.all_events(&scan_id).expect("events").len();
    thread::sleep(Duration::from_millis(200));
    let count_later = store.all_events(&scan_id).expect("events").len();
    assert_eq!(count_after_stop, count_later, "no events inserted after ABORTED");
}

#[test]
fn stop_on_terminal_scan_is_rejected() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);
    let err = scheduler.stop_scan(&scan_id).unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyTerminal { .. }));
}

#[test]
fn delete_requires_stopped_scan() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    assert_eq!(wait_terminal(&scheduler, &scan_id), ScanStatus::Finished);
    scheduler.delete_scan(&scan_id).expect("delete");
    let err = scheduler.status(&scan_id).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

// ============================================================================
// SECTION: Progress Stream
// ============================================================================

#[test]
fn progress_stream_terminates_on_terminal_state() {
    let store: Arc<InMemoryEventStore> = Arc::new(InMemoryEventStore::new());
    let provider = StaticProvider {
        factories: vec![Box::new(|| {
            Arc::new(Resolver::new("sfp_stub_resolver", &["93.184.216.34"])) as Arc<dyn Module>
        })],
    };
    let scheduler =
        ScanScheduler::new(Arc::clone(&store) as Arc<dyn EventStore>, Arc::new(provider), fast_settings());
    let scan_id = start(&scheduler);
    let stream = scheduler
        .stream_progress(&scan_id, Duration::from_millis(25))
        .expect("stream");
    let snapshots: Vec<_> = stream.collect();
    assert!(!snapshots.is_empty());
    let last = snapshots.last().expect("last");
    assert!(last.status.is_terminal());
    assert_eq!(last.overall_percent, 100);
}
