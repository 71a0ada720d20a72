// crates/strix-core/src/core/identifiers.rs
// ============================================================================
// Module: Strix Identifiers
// Description: Canonical opaque identifiers for scans, events, and modules.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde, rand
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Strix.
//! Identifiers are opaque and serialize as strings on the wire. Content
//! hashes enforce lowercase-hex invariants at construction boundaries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when parsing identifiers from wire input.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Scan identifier was not 16 lowercase hex characters.
    #[error("invalid scan id: {0}")]
    InvalidScanId(String),
    /// Event hash was not lowercase hex of the expected length.
    #[error("invalid event hash: {0}")]
    InvalidEventHash(String),
    /// Module name contained characters outside `[a-z0-9_]`.
    #[error("invalid module name: {0}")]
    InvalidModuleName(String),
}

/// Returns true when every character is lowercase hex.
fn is_lower_hex(value: &str) -> bool {
    value.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

// ============================================================================
// SECTION: Scan Identifier
// ============================================================================

/// Number of hex characters in a scan identifier.
const SCAN_ID_LENGTH: usize = 16;

/// Scan identifier.
///
/// # Invariants
/// - Always exactly 16 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    /// Generates a fresh random scan identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    /// Parses a scan identifier from wire input.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidScanId`] when the input is not
    /// 16 lowercase hex characters.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.len() == SCAN_ID_LENGTH && is_lower_hex(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdentifierError::InvalidScanId(raw.to_string()))
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Event Hash
// ============================================================================

/// Number of hex characters in a SHA-256 event hash.
const EVENT_HASH_LENGTH: usize = 64;

/// Content-addressed event hash.
///
/// # Invariants
/// - Always 64 lowercase hex characters, or the literal `ROOT` sentinel used
///   by seed events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventHash(String);

impl EventHash {
    /// Sentinel hash assigned to the synthetic seed event of a scan.
    pub const ROOT: &'static str = "ROOT";

    /// Wraps a digest already known to be lowercase hex.
    #[must_use]
    pub(crate) fn from_digest(digest: String) -> Self {
        Self(digest)
    }

    /// Returns the sentinel hash for seed events.
    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Parses an event hash from wire input.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidEventHash`] when the input is neither
    /// the `ROOT` sentinel nor 64 lowercase hex characters.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw == Self::ROOT || (raw.len() == EVENT_HASH_LENGTH && is_lower_hex(raw)) {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdentifierError::InvalidEventHash(raw.to_string()))
        }
    }

    /// Returns true when this is the seed sentinel hash.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Returns the hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Correlation Identifier
// ============================================================================

/// Correlation result identifier.
///
/// # Invariants
/// - Content-addressed over rule id plus sorted contributing event hashes, so
///   replayed rule runs reproduce the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wraps a digest already known to be lowercase hex.
    #[must_use]
    pub(crate) fn from_digest(digest: String) -> Self {
        Self(digest)
    }

    /// Wraps a stored correlation identifier without revalidation.
    #[must_use]
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Module Name
// ============================================================================

/// Maximum accepted length of a module name.
const MODULE_NAME_MAX_LENGTH: usize = 64;

/// Stable module identifier, e.g. `sfp_dnsresolve`.
///
/// # Invariants
/// - Non-empty, at most 64 characters, drawn from `[a-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(String);

impl ModuleName {
    /// Parses a module name from wire input.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidModuleName`] when the input is empty,
    /// too long, or contains characters outside `[a-z0-9_]`.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let valid = !raw.is_empty()
            && raw.len() <= MODULE_NAME_MAX_LENGTH
            && raw.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdentifierError::InvalidModuleName(raw.to_string()))
        }
    }

    /// Builds a module name from a compile-time constant.
    ///
    /// Intended for built-in module declarations whose names are known valid.
    #[must_use]
    pub fn from_static(raw: &'static str) -> Self {
        Self(raw.to_string())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn scan_id_generate_is_sixteen_lower_hex() {
        let id = ScanId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert!(is_lower_hex(id.as_str()));
    }

    #[test]
    fn scan_id_rejects_uppercase() {
        assert!(ScanId::parse("ABCDEF0123456789").is_err());
    }

    #[test]
    fn scan_id_rejects_wrong_length() {
        assert!(ScanId::parse("abc").is_err());
    }

    #[test]
    fn event_hash_accepts_root_sentinel() {
        let hash = EventHash::parse("ROOT").unwrap();
        assert!(hash.is_root());
    }

    #[test]
    fn module_name_rejects_dashes() {
        assert!(ModuleName::parse("sfp-dnsresolve").is_err());
    }

    #[test]
    fn module_name_accepts_builtin_form() {
        assert!(ModuleName::parse("sfp_dnsresolve").is_ok());
    }
}
