// crates/strix-modules/src/registry.rs
// ============================================================================
// Module: Module Registry
// Description: Registry of module factories keyed by stable module name.
// Purpose: Expand selections into fresh module instances for one scan.
// Dependencies: strix-core
// ============================================================================

//! ## Overview
//! The registry resolves module selections by name or use-case tag. Factories
//! produce fresh instances on every resolve, so modules may keep per-scan
//! state without cross-scan leakage. The registry is immutable after
//! construction and shared read-only across scans.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use strix_core::Module;
use strix_core::ModuleDescriptor;
use strix_core::ModuleName;
use strix_core::ModuleProvider;
use strix_core::ModuleSelection;
use strix_core::ResolveError;

use crate::dns::DnsResolveModule;
use crate::names::NamesModule;
use crate::portscan::TcpPortscanModule;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Factory producing one fresh module instance.
type ModuleFactory = Box<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Registry of module factories.
///
/// # Invariants
/// - Read-only after construction; safe for concurrent reads.
pub struct ModuleRegistry {
    /// Factories keyed by module name.
    factories: BTreeMap<ModuleName, ModuleFactory>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Creates a registry holding the built-in module set.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(|| Arc::new(DnsResolveModule::new()));
        registry.register(|| Arc::new(TcpPortscanModule::new()));
        registry.register(|| Arc::new(NamesModule::new()));
        registry
    }

    /// Registers a module factory under the name its descriptor declares.
    ///
    /// Later registrations under the same name overwrite earlier ones.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Arc<dyn Module> + Send + Sync + 'static,
    {
        let name = factory().descriptor().name.clone();
        self.factories.insert(name, Box::new(factory));
    }

    /// Returns the number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true when no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl ModuleProvider for ModuleRegistry {
    fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.factories
            .values()
            .map(|factory| factory().descriptor().clone())
            .collect()
    }

    fn resolve(&self, selection: &ModuleSelection) -> Result<Vec<Arc<dyn Module>>, ResolveError> {
        match selection {
            ModuleSelection::Names(names) => names
                .iter()
                .map(|name| {
                    self.factories
                        .get(name)
                        .map(|factory| factory())
                        .ok_or_else(|| ResolveError::UnknownModule(name.to_string()))
                })
                .collect(),
            ModuleSelection::ByUseCase(use_case) => Ok(self
                .factories
                .values()
                .map(|factory| factory())
                .filter(|module| module.descriptor().in_use_case(*use_case))
                .collect()),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use strix_core::UseCase;

    use super::*;

    #[test]
    fn builtin_set_registers_reference_modules() {
        let registry = ModuleRegistry::builtin();
        assert_eq!(registry.len(), 3);
        let descriptors = registry.descriptors();
        assert!(descriptors.iter().any(|d| d.name.as_str() == "sfp_dnsresolve"));
        assert!(descriptors.iter().any(|d| d.name.as_str() == "sfp_portscan_tcp"));
        assert!(descriptors.iter().any(|d| d.name.as_str() == "sfp_names"));
    }

    #[test]
    fn unknown_module_name_is_rejected() {
        let registry = ModuleRegistry::builtin();
        let selection = ModuleSelection::Names(vec![ModuleName::from_static("sfp_missing")]);
        assert!(matches!(
            registry.resolve(&selection),
            Err(ResolveError::UnknownModule(_))
        ));
    }

    #[test]
    fn passive_use_case_excludes_invasive_modules() {
        let registry = ModuleRegistry::builtin();
        let resolved = registry
            .resolve(&ModuleSelection::ByUseCase(UseCase::Passive))
            .unwrap();
        assert!(resolved
            .iter()
            .all(|module| !module.descriptor().flags.invasive));
    }

    #[test]
    fn all_use_case_selects_everything() {
        let registry = ModuleRegistry::builtin();
        let resolved = registry.resolve(&ModuleSelection::ByUseCase(UseCase::All)).unwrap();
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn resolve_returns_fresh_instances() {
        let registry = ModuleRegistry::builtin();
        let selection = ModuleSelection::Names(vec![ModuleName::from_static("sfp_names")]);
        let first = registry.resolve(&selection).unwrap();
        let second = registry.resolve(&selection).unwrap();
        assert!(!Arc::ptr_eq(&first[0], &second[0]));
    }
}
