// crates/strix-config/src/lib.rs
// ============================================================================
// Module: Strix Config Library
// Description: Engine configuration loading and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: strix-core, strix-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Engine configuration is loaded from a TOML file with strict size limits
//! and range checks on every knob. Missing or invalid configuration fails
//! closed; compiled-in defaults are used only when no file is present at all.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::CorrelationsConfig;
pub use config::EngineConfig;
pub use config::SchedulerConfig;
pub use config::ServerConfig;
