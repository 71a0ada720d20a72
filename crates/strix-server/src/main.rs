// crates/strix-server/src/main.rs
// ============================================================================
// Module: Strix Server Entry Point
// Description: Wires config, store, registry, rules, and scheduler together.
// Purpose: Run the REST API server process.
// Dependencies: strix-config, strix-core, strix-correlate, strix-modules,
// strix-store-sqlite, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! The server binary loads `strix.toml`, opens the SQLite store (or an
//! in-memory store when no store section is configured), loads correlation
//! rules, builds the scheduler with the correlation seam attached, and
//! serves the REST API until interrupted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::ExitCode;
use std::sync::Arc;

use strix_config::EngineConfig;
use strix_core::EventStore;
use strix_core::InMemoryEventStore;
use strix_core::ScanScheduler;
use strix_correlate::CorrelationEngine;
use strix_correlate::RuleSet;
use strix_modules::ModuleRegistry;
use strix_server::AppState;
use strix_store_sqlite::SqliteEventStore;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Builds the engine from configuration and serves HTTP.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!(error = %message, "strix server failed");
            ExitCode::FAILURE
        }
    }
}

/// Fallible server body.
async fn run() -> Result<(), String> {
    let config = EngineConfig::load(None).map_err(|err| err.to_string())?;
    let store: Arc<dyn EventStore> = match &config.store {
        Some(store_config) => Arc::new(
            SqliteEventStore::open(store_config.clone()).map_err(|err| err.to_string())?,
        ),
        None => {
            tracing::warn!("no store configured; scan data will not survive restarts");
            Arc::new(InMemoryEventStore::new())
        }
    };
    let rules = match RuleSet::load_dir(&config.correlations.dir) {
        Ok(rules) => {
            tracing::info!(
                loaded = rules.rules().len(),
                failed = rules.failures().len(),
                "correlation rules loaded"
            );
            Arc::new(rules)
        }
        Err(err) => {
            tracing::warn!(error = %err, "correlations directory unreadable; no rules loaded");
            Arc::new(RuleSet::default())
        }
    };
    let engine = Arc::new(CorrelationEngine::new(Arc::clone(&store), rules));
    let provider = Arc::new(ModuleRegistry::builtin());
    let mut scheduler = ScanScheduler::new(
        Arc::clone(&store),
        provider.clone(),
        config.engine_settings(),
    );
    if config.correlations.auto_run {
        scheduler = scheduler.with_correlator(engine.clone());
    }
    let state = AppState {
        scheduler: Arc::new(scheduler),
        store,
        engine,
        provider,
        progress_poll: std::time::Duration::from_millis(config.server.progress_poll_ms),
    };
    strix_server::serve(state, config.server.bind)
        .await
        .map_err(|err| err.to_string())
}
