// crates/strix-core/src/core/event.rs
// ============================================================================
// Module: Strix Events
// Description: Immutable event records and the event type taxonomy.
// Purpose: Define the fundamental data element routed by the scan engine.
// Dependencies: serde, crate::core::{identifiers, time}, crate::hashing
// ============================================================================

//! ## Overview
//! An event is a discrete data element discovered by a module. Events are
//! immutable after creation and content-addressed: the hash is a
//! deterministic function of `(type, data, source_hash)`. The only mutable
//! field is the out-of-band `false_positive` flag, which lives in the store
//! rather than on routed copies.
//! Invariants:
//! - `source_hash` refers to an event in the same scan, or is `None` for the
//!   synthetic seed event.
//! - Confidence and visibility default to 100, risk to 0.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EventHash;
use crate::core::identifiers::ModuleName;
use crate::core::time::Timestamp;
use crate::hashing;

// ============================================================================
// SECTION: Event Type Taxonomy
// ============================================================================

/// Well-known event type names.
///
/// The taxonomy is open-ended; modules may emit types not listed here. These
/// constants cover the types produced by the engine itself and the built-in
/// modules.
pub mod event_types {
    /// Synthetic scan seed marker type.
    pub const ROOT: &str = "ROOT";
    /// IPv4 address.
    pub const IP_ADDRESS: &str = "IP_ADDRESS";
    /// IPv6 address.
    pub const IPV6_ADDRESS: &str = "IPV6_ADDRESS";
    /// CIDR netblock.
    pub const NETBLOCK: &str = "NETBLOCK";
    /// Registered domain name.
    pub const DOMAIN_NAME: &str = "DOMAIN_NAME";
    /// Hostname under a scanned domain.
    pub const INTERNET_NAME: &str = "INTERNET_NAME";
    /// Email address.
    pub const EMAILADDR: &str = "EMAILADDR";
    /// Account or handle name.
    pub const USERNAME: &str = "USERNAME";
    /// Person name.
    pub const HUMAN_NAME: &str = "HUMAN_NAME";
    /// Phone number.
    pub const PHONE_NUMBER: &str = "PHONE_NUMBER";
    /// Bitcoin wallet address.
    pub const BITCOIN_ADDRESS: &str = "BITCOIN_ADDRESS";
    /// Ethereum wallet address.
    pub const ETHEREUM_ADDRESS: &str = "ETHEREUM_ADDRESS";
    /// Autonomous system number.
    pub const ASN: &str = "ASN";
    /// Open TCP port (`host:port`).
    pub const TCP_PORT_OPEN: &str = "TCP_PORT_OPEN";
    /// Service banner captured from an open TCP port.
    pub const TCP_PORT_OPEN_BANNER: &str = "TCP_PORT_OPEN_BANNER";
    /// Web server identification banner.
    pub const WEBSERVER_BANNER: &str = "WEBSERVER_BANNER";
    /// IP address reported as malicious by a data source.
    pub const MALICIOUS_IPADDR: &str = "MALICIOUS_IPADDR";
    /// IP address present on a blocklist.
    pub const BLACKLIST_IPADDR: &str = "BLACKLIST_IPADDR";
    /// Email address found in a breach corpus.
    pub const EMAILADDR_COMPROMISED: &str = "EMAILADDR_COMPROMISED";
    /// Unstructured content retained for downstream extraction.
    pub const RAW_DATA: &str = "RAW_DATA";
}

/// Module name recorded on engine-seeded events.
pub const ROOT_MODULE: &str = "strix";

/// Entity event types used as anchor points for correlation walks.
///
/// An `entity.*` field reference resolves an event's nearest ancestor whose
/// type appears in this set.
pub const ENTITY_TYPES: &[&str] = &[
    event_types::IP_ADDRESS,
    event_types::IPV6_ADDRESS,
    event_types::NETBLOCK,
    event_types::DOMAIN_NAME,
    event_types::INTERNET_NAME,
    event_types::EMAILADDR,
    event_types::USERNAME,
    event_types::HUMAN_NAME,
    event_types::PHONE_NUMBER,
    event_types::BITCOIN_ADDRESS,
    event_types::ETHEREUM_ADDRESS,
    event_types::ASN,
];

/// Returns true when the given event type is an entity anchor type.
#[must_use]
pub fn is_entity_type(event_type: &str) -> bool {
    ENTITY_TYPES.contains(&event_type)
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default confidence assigned to new events.
const DEFAULT_CONFIDENCE: u8 = 100;
/// Default visibility assigned to new events.
const DEFAULT_VISIBILITY: u8 = 100;
/// Default risk assigned to new events.
const DEFAULT_RISK: u8 = 0;

// ============================================================================
// SECTION: Event Record
// ============================================================================

/// Immutable event record.
///
/// # Invariants
/// - `hash` equals [`crate::hashing::event_hash`] over
///   `(event_type, data, source_hash)`.
/// - `false_positive` is mutated only through the store, never on routed
///   copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Content-addressed identifier.
    pub hash: EventHash,
    /// Event type from the open taxonomy.
    pub event_type: String,
    /// Event payload.
    pub data: String,
    /// Name of the module that produced the event.
    pub module: ModuleName,
    /// Generation time.
    pub generated: Timestamp,
    /// Hash of the parent event, absent on the seed.
    pub source_hash: Option<EventHash>,
    /// Producer confidence in the data, 0-100.
    pub confidence: u8,
    /// Visibility of the source, 0-100.
    pub visibility: u8,
    /// Risk conveyed by the data, 0-100.
    pub risk: u8,
    /// Analyst-set false positive flag.
    pub false_positive: bool,
}

impl Event {
    /// Builds the synthetic seed event for a scan target.
    ///
    /// The seed carries the classified target type and value, originates from
    /// the engine pseudo-module, and has no parent.
    #[must_use]
    pub fn seed(target_type: &str, target_value: &str) -> Self {
        let hash = hashing::event_hash(target_type, target_value, None);
        Self {
            hash,
            event_type: target_type.to_string(),
            data: target_value.to_string(),
            module: ModuleName::from_static(ROOT_MODULE),
            generated: Timestamp::now(),
            source_hash: None,
            confidence: DEFAULT_CONFIDENCE,
            visibility: DEFAULT_VISIBILITY,
            risk: DEFAULT_RISK,
            false_positive: false,
        }
    }
}

// ============================================================================
// SECTION: Event Draft
// ============================================================================

/// Event payload handed to `notify_listeners` by a module.
///
/// The framework completes the draft into an [`Event`]: it computes the
/// content hash, stamps the producing module and generation time, and links
/// the draft to its source event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    /// Event type from the open taxonomy.
    pub event_type: String,
    /// Event payload.
    pub data: String,
    /// Producer confidence in the data, 0-100.
    pub confidence: u8,
    /// Visibility of the source, 0-100.
    pub visibility: u8,
    /// Risk conveyed by the data, 0-100.
    pub risk: u8,
}

impl EventDraft {
    /// Creates a draft with default confidence, visibility, and risk.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            confidence: DEFAULT_CONFIDENCE,
            visibility: DEFAULT_VISIBILITY,
            risk: DEFAULT_RISK,
        }
    }

    /// Sets the risk score carried by the draft.
    #[must_use]
    pub const fn with_risk(mut self, risk: u8) -> Self {
        self.risk = risk;
        self
    }

    /// Completes the draft into an immutable event.
    #[must_use]
    pub fn into_event(self, module: ModuleName, source_hash: &EventHash) -> Event {
        let hash = hashing::event_hash(&self.event_type, &self.data, Some(source_hash));
        Event {
            hash,
            event_type: self.event_type,
            data: self.data,
            module,
            generated: Timestamp::now(),
            source_hash: Some(source_hash.clone()),
            confidence: self.confidence,
            visibility: self.visibility,
            risk: self.risk,
            false_positive: false,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_has_no_source() {
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        assert!(seed.source_hash.is_none());
        assert_eq!(seed.module.as_str(), ROOT_MODULE);
    }

    #[test]
    fn draft_links_to_source() {
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        let event = EventDraft::new(event_types::IP_ADDRESS, "93.184.216.34")
            .into_event(ModuleName::from_static("sfp_dnsresolve"), &seed.hash);
        assert_eq!(event.source_hash.as_ref(), Some(&seed.hash));
        assert_eq!(event.confidence, 100);
        assert_eq!(event.risk, 0);
    }

    #[test]
    fn entity_set_covers_target_kinds() {
        assert!(is_entity_type(event_types::IP_ADDRESS));
        assert!(is_entity_type(event_types::EMAILADDR));
        assert!(!is_entity_type(event_types::TCP_PORT_OPEN_BANNER));
    }
}
