// crates/strix-core/src/lib.rs
// ============================================================================
// Module: Strix Core Library
// Description: Data model, plugin contract, event bus, and scan scheduler.
// Purpose: Provide the backend-agnostic scan engine core for Strix.
// Dependencies: serde, serde_json, sha2, regex, thiserror, tracing
// ============================================================================

//! ## Overview
//! Strix Core defines the scan engine: the typed event model, the target
//! classifier, the module plugin contract, the per-scan event bus, and the
//! scan scheduler that drives modules to quiescence. Persistence is reached
//! only through the [`EventStore`] interface; adapters supply concrete
//! backends.
//! Invariants:
//! - Event hashes are deterministic over `(type, data, source_hash)`.
//! - Scan status transitions follow the lifecycle state machine.
//! - Each (module, event hash) pair is delivered at most once.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod export;
pub mod hashing;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::event::ENTITY_TYPES;
pub use crate::core::event::Event;
pub use crate::core::event::EventDraft;
pub use crate::core::event::ROOT_MODULE;
pub use crate::core::event::event_types;
pub use crate::core::identifiers::CorrelationId;
pub use crate::core::identifiers::EventHash;
pub use crate::core::identifiers::IdentifierError;
pub use crate::core::identifiers::ModuleName;
pub use crate::core::identifiers::ScanId;
pub use crate::core::options::OPTION_KEY_SEPARATOR;
pub use crate::core::options::ScanOptions;
pub use crate::core::state::LogEntry;
pub use crate::core::state::LogLevel;
pub use crate::core::state::ModuleProgress;
pub use crate::core::state::ModuleState;
pub use crate::core::state::ModuleStatus;
pub use crate::core::state::ProgressSnapshot;
pub use crate::core::state::ScanRecord;
pub use crate::core::state::ScanStatus;
pub use crate::core::state::StatusError;
pub use crate::core::summary::CorrelationRecord;
pub use crate::core::summary::RuleDescriptor;
pub use crate::core::summary::RuleRisk;
pub use crate::core::summary::ScanListRow;
pub use crate::core::summary::SummaryRow;
pub use crate::core::summary::UniqueRow;
pub use crate::core::summary::VizEdge;
pub use crate::core::summary::VizGraph;
pub use crate::core::summary::VizNode;
pub use crate::core::target::Target;
pub use crate::core::target::TargetError;
pub use crate::core::target::TargetKind;
pub use crate::core::time::Timestamp;
pub use crate::export::ExportError;
pub use crate::export::ExportFormat;
pub use crate::export::export_events;
pub use crate::interfaces::CorrelationRunError;
pub use crate::interfaces::CorrelationRunner;
pub use crate::interfaces::EventQuery;
pub use crate::interfaces::EventStore;
pub use crate::interfaces::InMemoryEventStore;
pub use crate::interfaces::LogQuery;
pub use crate::interfaces::Module;
pub use crate::interfaces::ModuleDescriptor;
pub use crate::interfaces::ModuleError;
pub use crate::interfaces::ModuleFlags;
pub use crate::interfaces::ModuleMeta;
pub use crate::interfaces::ModuleProvider;
pub use crate::interfaces::ModuleSelection;
pub use crate::interfaces::ResolveError;
pub use crate::interfaces::ScanContext;
pub use crate::interfaces::SetupError;
pub use crate::interfaces::StoreError;
pub use crate::interfaces::UseCase;
pub use crate::runtime::scheduler::EngineSettings;
pub use crate::runtime::scheduler::ProgressStream;
pub use crate::runtime::scheduler::ScanScheduler;
pub use crate::runtime::scheduler::SchedulerError;
pub use crate::runtime::scheduler::StartScanRequest;
