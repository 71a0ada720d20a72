// crates/strix-core/src/core/options.rs
// ============================================================================
// Module: Strix Scan Options
// Description: Frozen per-scan option snapshot.
// Purpose: Give modules read-only configuration that never changes mid-scan.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A scan's options are assembled once at `StartScan` from engine defaults
//! plus caller overrides, then frozen. Keys are flat strings; module-scoped
//! keys use a `module.option` form and shadow the bare global key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ModuleName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Separator between a module name and an option key in scoped entries.
pub const OPTION_KEY_SEPARATOR: char = '.';

// ============================================================================
// SECTION: Scan Options
// ============================================================================

/// Immutable option snapshot for one scan.
///
/// # Invariants
/// - Never mutated after construction; the store persists the same snapshot
///   that modules observe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanOptions(BTreeMap<String, String>);

impl ScanOptions {
    /// Builds a snapshot from prepared key/value pairs.
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    /// Looks up an option for a module.
    ///
    /// A `module.key` scoped entry shadows the bare `key` entry.
    #[must_use]
    pub fn get(&self, module: &ModuleName, key: &str) -> Option<&str> {
        let scoped = format!("{}{}{}", module.as_str(), OPTION_KEY_SEPARATOR, key);
        self.0
            .get(&scoped)
            .or_else(|| self.0.get(key))
            .map(String::as_str)
    }

    /// Looks up a global (unscoped) option.
    #[must_use]
    pub fn get_global(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterates all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of entries in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the snapshot has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_key_shadows_global() {
        let mut entries = BTreeMap::new();
        entries.insert("timeout".to_string(), "30".to_string());
        entries.insert("sfp_dnsresolve.timeout".to_string(), "5".to_string());
        let options = ScanOptions::from_entries(entries);
        let module = ModuleName::from_static("sfp_dnsresolve");
        assert_eq!(options.get(&module, "timeout"), Some("5"));
        let other = ModuleName::from_static("sfp_names");
        assert_eq!(options.get(&other, "timeout"), Some("30"));
    }
}
