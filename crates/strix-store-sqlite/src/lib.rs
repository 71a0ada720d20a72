// crates/strix-store-sqlite/src/lib.rs
// ============================================================================
// Module: Strix SQLite Store Library
// Description: Durable EventStore backed by SQLite WAL.
// Purpose: Persist scans, events, module state, logs, and correlations.
// Dependencies: strix-core, rusqlite, thiserror
// ============================================================================

//! ## Overview
//! This crate provides the embedded single-file backend for the Strix event
//! store. All mutations flow through a dedicated writer thread fed by a
//! bounded queue, which serializes writes and keeps row ordering stable;
//! reads run on a round-robin pool of read-only connections under WAL.
//! Invariants:
//! - `(scan_id, hash)` and `(correlation_id, event_hash)` are unique.
//! - Schema creation is idempotent.
//! - Transient busy/locked errors surface as retriable store errors.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::DurabilityProfile;
pub use store::SqliteEventStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
