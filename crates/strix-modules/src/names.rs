// crates/strix-modules/src/names.rs
// ============================================================================
// Module: Name Extraction Module
// Description: Passive extraction of emails and hostnames from raw content.
// Purpose: Turn RAW_DATA and banner events into typed identity events.
// Dependencies: strix-core, regex
// ============================================================================

//! ## Overview
//! `sfp_names` scans unstructured content for email addresses and hostnames
//! that belong to the scan target and emits them as typed events. It performs
//! no network I/O and is safe for any use case. Candidates outside the target
//! domain are dropped to keep the event graph on-scope.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use strix_core::Event;
use strix_core::EventDraft;
use strix_core::Module;
use strix_core::ModuleDescriptor;
use strix_core::ModuleError;
use strix_core::ModuleFlags;
use strix_core::ModuleMeta;
use strix_core::ModuleName;
use strix_core::ScanContext;
use strix_core::SetupError;
use strix_core::TargetKind;
use strix_core::UseCase;
use strix_core::event_types;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Stable module name.
const MODULE_NAME: &str = "sfp_names";

/// Email candidates inside free text.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Hostname candidates inside free text.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static HOST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-z0-9][a-z0-9-]*(\.[a-z0-9][a-z0-9-]*)+\b").unwrap());

// ============================================================================
// SECTION: Module
// ============================================================================

/// Passive name extraction module.
pub struct NamesModule {
    /// Static descriptor.
    descriptor: ModuleDescriptor,
}

impl NamesModule {
    /// Creates a fresh instance for one scan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: ModuleDescriptor {
                name: ModuleName::from_static(MODULE_NAME),
                meta: ModuleMeta {
                    human_name: "Name Extractor".to_string(),
                    summary: "Extracts on-target emails and hostnames from raw content".to_string(),
                    category: "Content Analysis".to_string(),
                    use_cases: vec![UseCase::Passive, UseCase::Footprint, UseCase::Investigate],
                },
                watched_events: vec![
                    event_types::RAW_DATA.to_string(),
                    event_types::TCP_PORT_OPEN_BANNER.to_string(),
                ],
                produced_events: vec![
                    event_types::EMAILADDR.to_string(),
                    event_types::INTERNET_NAME.to_string(),
                ],
                opt_defaults: BTreeMap::new(),
                opt_descriptions: BTreeMap::new(),
                flags: ModuleFlags {
                    passive: true,
                    needs_api_key: false,
                    invasive: false,
                    thread_safe: true,
                },
            },
        }
    }

    /// Returns the domain suffix candidates must belong to, when the target
    /// is a name-shaped kind.
    fn target_suffix(ctx: &dyn ScanContext) -> Option<String> {
        let target = ctx.target();
        match target.kind {
            TargetKind::DomainName | TargetKind::InternetName => Some(target.value.clone()),
            TargetKind::EmailAddr => {
                target.value.split_once('@').map(|(_, domain)| domain.to_string())
            }
            _ => None,
        }
    }

    /// Returns true when the hostname is the suffix itself or a label under it.
    fn on_target(host: &str, suffix: &str) -> bool {
        host == suffix || host.ends_with(&format!(".{suffix}"))
    }
}

impl Default for NamesModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for NamesModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn setup(&self, _ctx: &dyn ScanContext) -> Result<(), SetupError> {
        Ok(())
    }

    fn handle_event(&self, ctx: &dyn ScanContext, event: &Event) -> Result<(), ModuleError> {
        if ctx.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let Some(suffix) = Self::target_suffix(ctx) else {
            return Ok(());
        };
        let text = event.data.to_ascii_lowercase();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for capture in EMAIL_PATTERN.find_iter(&text) {
            let email = capture.as_str().to_string();
            let Some((_, domain)) = email.split_once('@') else {
                continue;
            };
            if Self::on_target(domain, &suffix) && seen.insert(email.clone()) {
                ctx.notify_listeners(&event.hash, EventDraft::new(event_types::EMAILADDR, email))?;
            }
        }
        for capture in HOST_PATTERN.find_iter(&text) {
            let host = capture.as_str().to_string();
            if host != suffix
                && Self::on_target(&host, &suffix)
                && seen.insert(host.clone())
            {
                ctx.notify_listeners(
                    &event.hash,
                    EventDraft::new(event_types::INTERNET_NAME, host),
                )?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_target_accepts_subdomains_only() {
        assert!(NamesModule::on_target("mail.example.com", "example.com"));
        assert!(NamesModule::on_target("example.com", "example.com"));
        assert!(!NamesModule::on_target("example.com.evil.net", "example.com"));
        assert!(!NamesModule::on_target("other.org", "example.com"));
    }
}
