// crates/strix-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Durable store semantics over a temporary database file.
// ============================================================================
//! ## Overview
//! Exercises idempotent event inserts, scan lifecycle rows, module state,
//! logs, false positives, correlations, deletion guards, and the query
//! layer reads against a real `SQLite` file.

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

use strix_core::CorrelationRecord;
use strix_core::Event;
use strix_core::EventDraft;
use strix_core::EventQuery;
use strix_core::EventStore;
use strix_core::LogEntry;
use strix_core::LogLevel;
use strix_core::LogQuery;
use strix_core::ModuleName;
use strix_core::ModuleState;
use strix_core::ModuleStatus;
use strix_core::RuleDescriptor;
use strix_core::RuleRisk;
use strix_core::ScanId;
use strix_core::ScanOptions;
use strix_core::ScanRecord;
use strix_core::ScanStatus;
use strix_core::StoreError;
use strix_core::Timestamp;
use strix_core::event_types;
use strix_core::hashing;
use strix_store_sqlite::SqliteEventStore;
use strix_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Opens a store in a fresh temporary directory.
fn open_store() -> (TempDir, SqliteEventStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteEventStore::open(SqliteStoreConfig::for_path(dir.path().join("strix.db")))
        .expect("open store");
    (dir, store)
}

/// Creates a scan row with one selected module.
fn create_scan(store: &SqliteEventStore) -> ScanId {
    let scan_id = ScanId::generate();
    let mut options = BTreeMap::new();
    options.insert("timeout".to_string(), "30".to_string());
    options.insert("sfp_stub.limit".to_string(), "10".to_string());
    let record = ScanRecord {
        scan_id: scan_id.clone(),
        name: "store test".to_string(),
        seed_target: "example.com".to_string(),
        seed_type: "DOMAIN_NAME".to_string(),
        created: Timestamp::now(),
        started: None,
        ended: None,
        status: ScanStatus::Created,
        modules: vec![ModuleName::from_static("sfp_stub")],
    };
    store
        .create_scan(&record, &ScanOptions::from_entries(options))
        .expect("create scan");
    scan_id
}

/// Builds the seed event plus `count` children.
fn seed_and_children(count: usize) -> (Event, Vec<Event>) {
    let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
    let children = (0 .. count)
        .map(|index| {
            EventDraft::new(event_types::IP_ADDRESS, format!("93.184.216.{index}"))
                .into_event(ModuleName::from_static("sfp_stub"), &seed.hash)
        })
        .collect();
    (seed, children)
}

// ============================================================================
// SECTION: Scan Rows
// ============================================================================

#[test]
fn create_scan_round_trips() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let record = store.get_scan(&scan_id).expect("get scan");
    assert_eq!(record.status, ScanStatus::Created);
    assert_eq!(record.seed_target, "example.com");
    assert_eq!(record.modules.len(), 1);
}

#[test]
fn duplicate_scan_id_is_a_conflict() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let record = store.get_scan(&scan_id).expect("get scan");
    let err = store
        .create_scan(&record, &ScanOptions::default())
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[test]
fn status_update_persists_started_and_ended() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    store
        .set_scan_status(&scan_id, ScanStatus::Starting, None, None)
        .expect("starting");
    store
        .set_scan_status(&scan_id, ScanStatus::Running, Some(Timestamp::now()), None)
        .expect("running");
    store
        .set_scan_status(&scan_id, ScanStatus::Finished, None, Some(Timestamp::now()))
        .expect("finished");
    let record = store.get_scan(&scan_id).expect("get scan");
    assert_eq!(record.status, ScanStatus::Finished);
    assert!(record.started.is_some());
    assert!(record.ended.is_some());
}

#[test]
fn unknown_scan_reads_not_found() {
    let (_dir, store) = open_store();
    let missing = ScanId::generate();
    assert!(matches!(store.get_scan(&missing), Err(StoreError::NotFound(_))));
    assert!(matches!(store.scan_options(&missing), Err(StoreError::NotFound(_))));
}

#[test]
fn options_snapshot_round_trips() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let options = store.scan_options(&scan_id).expect("options");
    assert_eq!(options.get_global("timeout"), Some("30"));
    let module = ModuleName::from_static("sfp_stub");
    assert_eq!(options.get(&module, "limit"), Some("10"));
}

// ============================================================================
// SECTION: Events
// ============================================================================

#[test]
fn insert_event_is_idempotent() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, _) = seed_and_children(0);
    assert!(store.insert_event(&scan_id, &seed).expect("first insert"));
    assert!(!store.insert_event(&scan_id, &seed).expect("second insert"));
    let events = store.all_events(&scan_id).expect("events");
    assert_eq!(events.len(), 1);
}

#[test]
fn events_preserve_fields_and_links() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, children) = seed_and_children(2);
    store.insert_event(&scan_id, &seed).expect("seed");
    for child in &children {
        store.insert_event(&scan_id, child).expect("child");
    }
    let events = store.all_events(&scan_id).expect("events");
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], seed);
    for (stored, child) in events[1 ..].iter().zip(&children) {
        assert_eq!(stored, child);
        assert_eq!(stored.source_hash.as_ref(), Some(&seed.hash));
    }
}

#[test]
fn event_query_filters_and_paginates() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, children) = seed_and_children(5);
    store.insert_event(&scan_id, &seed).expect("seed");
    for child in &children {
        store.insert_event(&scan_id, child).expect("child");
    }
    let page = store
        .events(&scan_id, &EventQuery {
            event_type: Some(event_types::IP_ADDRESS.to_string()),
            limit: 2,
            offset: 2,
            ..EventQuery::default()
        })
        .expect("events");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].data, "93.184.216.2");
    assert_eq!(page[1].data, "93.184.216.3");

    let by_module = store
        .events(&scan_id, &EventQuery {
            module: Some(ModuleName::from_static("sfp_stub")),
            ..EventQuery::default()
        })
        .expect("events");
    assert_eq!(by_module.len(), 5);
}

#[test]
fn summary_counts_totals_and_uniques() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, children) = seed_and_children(3);
    store.insert_event(&scan_id, &seed).expect("seed");
    for child in &children {
        store.insert_event(&scan_id, child).expect("child");
    }
    let summary = store.summary(&scan_id).expect("summary");
    let ip_row = summary
        .iter()
        .find(|row| row.key == event_types::IP_ADDRESS)
        .expect("ip row");
    assert_eq!(ip_row.total, 3);
    assert_eq!(ip_row.unique_total, 3);
}

#[test]
fn events_unique_orders_by_count() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
    store.insert_event(&scan_id, &seed).expect("seed");
    for (source, banner) in [("a", "nginx"), ("b", "nginx"), ("c", "apache")] {
        let host = EventDraft::new(event_types::INTERNET_NAME, format!("{source}.example.com"))
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        store.insert_event(&scan_id, &host).expect("host");
        let event = EventDraft::new(event_types::WEBSERVER_BANNER, banner)
            .into_event(ModuleName::from_static("sfp_stub"), &host.hash);
        store.insert_event(&scan_id, &event).expect("banner");
    }
    let uniques = store
        .events_unique(&scan_id, event_types::WEBSERVER_BANNER)
        .expect("uniques");
    assert_eq!(uniques.len(), 2);
    assert_eq!(uniques[0].data, "nginx");
    assert_eq!(uniques[0].count, 2);
    assert_eq!(uniques[1].data, "apache");
}

#[test]
fn viz_projects_nodes_and_edges() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, children) = seed_and_children(2);
    store.insert_event(&scan_id, &seed).expect("seed");
    for child in &children {
        store.insert_event(&scan_id, child).expect("child");
    }
    let graph = store.viz(&scan_id).expect("viz");
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
    assert!(graph.edges.iter().all(|edge| edge.source == seed.hash));
}

#[test]
fn false_positive_flag_round_trips() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, children) = seed_and_children(2);
    store.insert_event(&scan_id, &seed).expect("seed");
    for child in &children {
        store.insert_event(&scan_id, child).expect("child");
    }
    let hashes: Vec<_> = children.iter().map(|child| child.hash.clone()).collect();
    let updated = store
        .set_false_positive(&scan_id, &hashes, true)
        .expect("set fp");
    assert_eq!(updated, 2);
    let events = store.all_events(&scan_id).expect("events");
    assert!(events.iter().filter(|e| e.source_hash.is_some()).all(|e| e.false_positive));
    assert!(!events.iter().find(|e| e.source_hash.is_none()).expect("seed").false_positive);
}

// ============================================================================
// SECTION: Module State & Logs
// ============================================================================

#[test]
fn module_state_upserts() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let mut state = ModuleState::pending(ModuleName::from_static("sfp_stub"));
    state.status = ModuleStatus::Running;
    state.started = Some(Timestamp::now());
    state.events_produced = 7;
    store.update_module_state(&scan_id, &state).expect("update");
    let states = store.module_states(&scan_id).expect("states");
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, ModuleStatus::Running);
    assert_eq!(states[0].events_produced, 7);
}

#[test]
fn logs_filter_by_level_and_order_newest_first() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    for (level, message) in [
        (LogLevel::Info, "first"),
        (LogLevel::Error, "second"),
        (LogLevel::Info, "third"),
    ] {
        store
            .append_log(&scan_id, &LogEntry::new("strix", level, message))
            .expect("log");
    }
    let all = store.logs(&scan_id, &LogQuery::default()).expect("logs");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].message, "third");
    let errors = store
        .logs(&scan_id, &LogQuery {
            level: Some(LogLevel::Error),
            limit: 10,
        })
        .expect("logs");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "second");
}

// ============================================================================
// SECTION: Correlations
// ============================================================================

#[test]
fn correlation_write_is_idempotent() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, children) = seed_and_children(2);
    store.insert_event(&scan_id, &seed).expect("seed");
    for child in &children {
        store.insert_event(&scan_id, child).expect("child");
    }
    let hashes: Vec<_> = children.iter().map(|child| child.hash.clone()).collect();
    let record = CorrelationRecord {
        correlation_id: hashing::correlation_id("stub_rule", &hashes),
        rule: RuleDescriptor {
            rule_id: "stub_rule".to_string(),
            name: "Stub Rule".to_string(),
            description: "test".to_string(),
            risk: RuleRisk::High,
            logic: "collections: []".to_string(),
        },
        title: "two addresses".to_string(),
        events: hashes,
    };
    store.write_correlation(&scan_id, &record).expect("first write");
    store.write_correlation(&scan_id, &record).expect("second write");
    let correlations = store.correlations(&scan_id).expect("read");
    assert_eq!(correlations.len(), 1);
    assert_eq!(correlations[0].events.len(), 2);
    assert_eq!(correlations[0].rule.risk, RuleRisk::High);
}

// ============================================================================
// SECTION: Deletion
// ============================================================================

#[test]
fn delete_running_scan_is_a_conflict() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    store
        .set_scan_status(&scan_id, ScanStatus::Starting, None, None)
        .expect("starting");
    store
        .set_scan_status(&scan_id, ScanStatus::Running, Some(Timestamp::now()), None)
        .expect("running");
    let err = store.delete_scan(&scan_id).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[test]
fn delete_removes_every_row() {
    let (_dir, store) = open_store();
    let scan_id = create_scan(&store);
    let (seed, _) = seed_and_children(0);
    store.insert_event(&scan_id, &seed).expect("seed");
    store
        .append_log(&scan_id, &LogEntry::new("strix", LogLevel::Info, "hello"))
        .expect("log");
    store.delete_scan(&scan_id).expect("delete");
    assert!(matches!(store.get_scan(&scan_id), Err(StoreError::NotFound(_))));
    assert!(store.list_scans().expect("list").is_empty());
}

#[test]
fn list_scans_orders_newest_first() {
    let (_dir, store) = open_store();
    let first = create_scan(&store);
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = create_scan(&store);
    let rows = store.list_scans().expect("list");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].scan_id, second);
    assert_eq!(rows[1].scan_id, first);
}
