// crates/strix-server/src/server/tests.rs
// ============================================================================
// Module: REST Server Tests
// Description: Handler-level status mapping over the in-memory store.
// ============================================================================
//! ## Overview
//! Exercises the error mapping contract: invalid input is 400, unknown scans
//! are 404, state conflicts are 409, and unsupported export formats are 415.

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
use std::time::Duration;
use std::time::Instant;

use strix_core::EngineSettings;
use strix_core::InMemoryEventStore;
use strix_core::StartScanRequest;
use strix_correlate::RuleSet;
use strix_modules::ModuleRegistry;

use super::*;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Builds app state over an in-memory store and an empty module registry.
fn test_state() -> AppState {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let provider = Arc::new(ModuleRegistry::empty());
    let settings = EngineSettings {
        quiescence_grace: Duration::from_millis(50),
        ..EngineSettings::default()
    };
    let scheduler = Arc::new(ScanScheduler::new(
        Arc::clone(&store),
        provider.clone(),
        settings,
    ));
    let engine = Arc::new(CorrelationEngine::new(
        Arc::clone(&store),
        Arc::new(RuleSet::default()),
    ));
    AppState {
        scheduler,
        store,
        engine,
        provider,
        progress_poll: Duration::from_millis(50),
    }
}

/// Starts an empty-selection scan and waits for it to finish.
fn finished_scan(state: &AppState) -> ScanId {
    let scan_id = state
        .scheduler
        .start_scan(StartScanRequest {
            name: "handler test".to_string(),
            target: "example.com".to_string(),
            target_kind: None,
            selection: ModuleSelection::ByUseCase(UseCase::All),
            option_overrides: BTreeMap::new(),
        })
        .expect("start scan");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snap = state.scheduler.status(&scan_id).expect("status");
        if snap.status.is_terminal() {
            return scan_id;
        }
        assert!(Instant::now() < deadline, "scan did not finish");
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// A syntactically valid but unknown scan id.
fn missing_id() -> String {
    "0123456789abcdef".to_string()
}

// ============================================================================
// SECTION: Status Mapping
// ============================================================================

#[tokio::test]
async fn bad_target_is_bad_request() {
    let state = test_state();
    let result = create_scan(
        State(state),
        Json(CreateScanBody {
            target: "!!! not a target !!!".to_string(),
            scan_name: "bad".to_string(),
            scan_type: "All".to_string(),
            modules: None,
        }),
    )
    .await;
    let err = result.err().expect("error");
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_use_case_is_bad_request() {
    let state = test_state();
    let result = create_scan(
        State(state),
        Json(CreateScanBody {
            target: "example.com".to_string(),
            scan_name: "bad".to_string(),
            scan_type: "Turbo".to_string(),
            modules: None,
        }),
    )
    .await;
    let err = result.err().expect("error");
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_scan_reads_are_not_found() {
    let state = test_state();
    let err = scan_detail(State(state.clone()), Path(missing_id()))
        .await
        .err()
        .expect("error");
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
    let err = scan_summary(State(state.clone()), Path(missing_id()))
        .await
        .err()
        .expect("error");
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
    let err = stop_scan(State(state), Path(missing_id())).await.err().expect("error");
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_scan_id_is_not_found() {
    let state = test_state();
    let err = scan_detail(State(state), Path("not-a-scan-id".to_string()))
        .await
        .err()
        .expect("error");
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_on_terminal_scan_is_conflict() {
    let state = test_state();
    let scan_id = finished_scan(&state);
    let err = stop_scan(State(state), Path(scan_id.as_str().to_string()))
        .await
        .err()
        .expect("error");
    assert_eq!(err.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn export_rejects_unsupported_format() {
    let state = test_state();
    let scan_id = finished_scan(&state);
    let err = export_scan(
        State(state),
        Path((scan_id.as_str().to_string(), "xlsx".to_string())),
    )
    .await
    .err()
    .expect("error");
    assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn export_json_succeeds_for_finished_scan() {
    let state = test_state();
    let scan_id = finished_scan(&state);
    let response = export_scan(
        State(state),
        Path((scan_id.as_str().to_string(), "json".to_string())),
    )
    .await
    .expect("export");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn false_positive_rejects_malformed_hashes() {
    let state = test_state();
    let scan_id = finished_scan(&state);
    let err = set_false_positive(
        State(state),
        Path(scan_id.as_str().to_string()),
        Json(FalsePositiveBody {
            hashes: vec!["zzzz".to_string()],
            fp: true,
        }),
    )
    .await
    .err()
    .expect("error");
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn module_listing_serves_descriptors() {
    let state = test_state();
    let _response = list_modules(State(state)).await;
}

#[tokio::test]
async fn run_correlations_reports_counts() {
    let state = test_state();
    let scan_id = finished_scan(&state);
    let result = run_correlations(
        State(state),
        Path(scan_id.as_str().to_string()),
        Some(Json(RunCorrelationsBody::default())),
    )
    .await;
    assert!(result.is_ok());
}
