// crates/strix-cli/src/main.rs
// ============================================================================
// Module: Strix CLI Entry Point
// Description: Single-scan command line front-end for the scan engine.
// Purpose: Run one scan to completion and print its events.
// Dependencies: clap, strix-config, strix-core, strix-correlate, strix-modules,
// strix-store-sqlite, tracing-subscriber
// ============================================================================

//! ## Overview
//! The `strix` binary runs one scan synchronously: classify the target, build
//! the engine from `strix.toml`, run the selected modules to a terminal
//! state, run correlations, and print the stored events on stdout. Exit
//! codes: 0 on success, 1 on engine failure, 2 on bad arguments, 3 when the
//! target cannot be classified. Diagnostics go to stderr; stdout carries only
//! scan output.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap::ValueEnum;
use strix_config::EngineConfig;
use strix_core::EventStore;
use strix_core::ExportFormat;
use strix_core::InMemoryEventStore;
use strix_core::ModuleName;
use strix_core::ModuleSelection;
use strix_core::ScanScheduler;
use strix_core::ScanStatus;
use strix_core::SchedulerError;
use strix_core::StartScanRequest;
use strix_core::TargetKind;
use strix_core::export_events;
use strix_correlate::CorrelationEngine;
use strix_correlate::RuleSet;
use strix_modules::ModuleRegistry;
use strix_store_sqlite::SqliteEventStore;

// ============================================================================
// SECTION: Exit Codes
// ============================================================================

/// Generic engine or I/O failure.
const EXIT_FAILURE: u8 = 1;
/// Target could not be classified.
const EXIT_BAD_TARGET: u8 = 3;

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// Output encodings accepted by `-o`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// RFC 4180 CSV.
    Csv,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Maps the CLI flag onto the core export format.
    const fn as_export(self) -> ExportFormat {
        match self {
            Self::Csv => ExportFormat::Csv,
            Self::Json => ExportFormat::Json,
        }
    }
}

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "strix", version, about = "Strix OSINT scan engine")]
struct Args {
    /// Scan target (IP, netblock, domain, email, and friends).
    #[arg(short = 's', long = "target", value_name = "TARGET")]
    target: String,
    /// Target type, e.g. DOMAIN_NAME or IP_ADDRESS.
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    target_type: String,
    /// Comma-separated module list, or a use case (Passive, Footprint,
    /// Investigate, All).
    #[arg(short = 'm', long = "modules", value_name = "MOD1,MOD2")]
    modules: String,
    /// Output format for the event listing.
    #[arg(short = 'o', long = "output", value_enum, default_value_t = OutputFormat::Csv)]
    output: OutputFormat,
    /// Optional config file path; defaults to strix.toml when present.
    #[arg(long = "config", value_name = "FILE")]
    config: Option<std::path::PathBuf>,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Parses arguments and runs one scan.
fn main() -> ExitCode {
    // clap exits with status 2 on malformed arguments.
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Fallible scan body; returns the process exit code on failure.
fn run(args: &Args) -> Result<(), u8> {
    let config = EngineConfig::load(args.config.as_deref()).map_err(|err| {
        tracing::error!(error = %err, "configuration failed to load");
        EXIT_FAILURE
    })?;
    let store: Arc<dyn EventStore> = match &config.store {
        Some(store_config) => {
            Arc::new(SqliteEventStore::open(store_config.clone()).map_err(|err| {
                tracing::error!(error = %err, "store failed to open");
                EXIT_FAILURE
            })?)
        }
        None => Arc::new(InMemoryEventStore::new()),
    };
    let rules = RuleSet::load_dir(&config.correlations.dir)
        .map(Arc::new)
        .unwrap_or_default();
    let engine = Arc::new(CorrelationEngine::new(Arc::clone(&store), rules));
    let provider = Arc::new(ModuleRegistry::builtin());
    let mut scheduler =
        ScanScheduler::new(Arc::clone(&store), provider, config.engine_settings());
    if config.correlations.auto_run {
        scheduler = scheduler.with_correlator(engine);
    }

    let target_kind = TargetKind::parse(&args.target_type).map_err(|err| {
        tracing::error!(error = %err, "unknown target type");
        EXIT_BAD_TARGET
    })?;
    let selection = parse_selection(&args.modules).map_err(|message| {
        tracing::error!(error = %message, "bad module selection");
        EXIT_FAILURE
    })?;
    let scan_id = scheduler
        .start_scan(StartScanRequest {
            name: format!("strix {}", args.target),
            target: args.target.clone(),
            target_kind: Some(target_kind),
            selection,
            option_overrides: BTreeMap::new(),
        })
        .map_err(|err| match err {
            SchedulerError::InvalidTarget(inner) => {
                tracing::error!(error = %inner, "target failed classification");
                EXIT_BAD_TARGET
            }
            other => {
                tracing::error!(error = %other, "scan failed to start");
                EXIT_FAILURE
            }
        })?;

    let stream = scheduler
        .stream_progress(&scan_id, Duration::from_millis(500))
        .map_err(|err| {
            tracing::error!(error = %err, "progress stream failed");
            EXIT_FAILURE
        })?;
    let mut final_status = ScanStatus::ErrorFailed;
    for snapshot in stream {
        tracing::info!(
            status = %snapshot.status,
            percent = snapshot.overall_percent,
            "scan progress"
        );
        final_status = snapshot.status;
    }
    if final_status != ScanStatus::Finished {
        tracing::error!(status = %final_status, "scan did not finish cleanly");
        return Err(EXIT_FAILURE);
    }

    let events = store.all_events(&scan_id).map_err(|err| {
        tracing::error!(error = %err, "event read failed");
        EXIT_FAILURE
    })?;
    let bytes = export_events(&events, args.output.as_export()).map_err(|err| {
        tracing::error!(error = %err, "export failed");
        EXIT_FAILURE
    })?;
    std::io::stdout().write_all(&bytes).map_err(|err| {
        tracing::error!(error = %err, "stdout write failed");
        EXIT_FAILURE
    })?;
    Ok(())
}

/// Parses `-m` as either a use-case tag or a comma-separated module list.
fn parse_selection(raw: &str) -> Result<ModuleSelection, String> {
    if let Ok(use_case) = strix_core::UseCase::parse(raw) {
        return Ok(ModuleSelection::ByUseCase(use_case));
    }
    let names = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| ModuleName::parse(part).map_err(|err| err.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    if names.is_empty() {
        return Err("module selection is empty".to_string());
    }
    Ok(ModuleSelection::Names(names))
}
