// crates/strix-modules/src/lib.rs
// ============================================================================
// Module: Strix Modules Library
// Description: Module registry and built-in reference modules.
// Purpose: Resolve module selections into fresh plugin instances per scan.
// Dependencies: strix-core, regex, tracing
// ============================================================================

//! ## Overview
//! The registry maps stable module names to factories producing fresh
//! [`strix_core::Module`] instances, so per-scan module state never leaks
//! between scans. The built-in set proves the plugin contract end to end:
//! DNS resolution, TCP connect probing, and passive name extraction.
//! Invariants:
//! - The registry is read-only after construction and safe for concurrent
//!   reads.
//! - `resolve` returns new instances on every call.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod dns;
pub mod names;
pub mod portscan;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use dns::DnsResolveModule;
pub use names::NamesModule;
pub use portscan::TcpPortscanModule;
pub use registry::ModuleRegistry;
