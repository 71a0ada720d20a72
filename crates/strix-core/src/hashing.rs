// crates/strix-core/src/hashing.rs
// ============================================================================
// Module: Strix Content Hashing
// Description: SHA-256 content addressing for events and correlations.
// Purpose: Produce deterministic, replay-stable identifiers from event content.
// Dependencies: sha2
// ============================================================================

//! ## Overview
//! Event hashes are a deterministic function of `(type, data, source_hash)`
//! so replayed scans and re-run correlation rules reproduce identical
//! identifiers. Correlation identifiers hash the rule id together with the
//! sorted set of contributing event hashes. All digests are lowercase hex.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::EventHash;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Field separator fed between hash inputs.
///
/// A NUL byte cannot appear inside event type names, and its use between
/// fields keeps `("ab", "c")` distinct from `("a", "bc")`.
const FIELD_SEPARATOR: u8 = 0;

// ============================================================================
// SECTION: Digest Helpers
// ============================================================================

/// Hashes raw bytes into a lowercase hex SHA-256 digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Computes the content-addressed hash of an event.
///
/// The digest covers the event type, the payload, and the parent hash (empty
/// for seed events), each separated by a NUL byte.
#[must_use]
pub fn event_hash(event_type: &str, data: &str, source_hash: Option<&EventHash>) -> EventHash {
    let mut hasher = Sha256::new();
    hasher.update(event_type.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(data.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    if let Some(source) = source_hash {
        hasher.update(source.as_str().as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    EventHash::from_digest(out)
}

/// Computes a deterministic correlation identifier.
///
/// Event hashes are sorted and deduplicated before hashing so the identifier
/// is independent of collection order.
#[must_use]
pub fn correlation_id(rule_id: &str, event_hashes: &[EventHash]) -> CorrelationId {
    let mut sorted: Vec<&str> = event_hashes.iter().map(EventHash::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    for hash in sorted {
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(hash.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    CorrelationId::from_digest(out)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_hash_is_deterministic() {
        let root = EventHash::root();
        let a = event_hash("IP_ADDRESS", "1.2.3.4", Some(&root));
        let b = event_hash("IP_ADDRESS", "1.2.3.4", Some(&root));
        assert_eq!(a, b);
    }

    #[test]
    fn event_hash_separates_fields() {
        let a = event_hash("AB", "C", None);
        let b = event_hash("A", "BC", None);
        assert_ne!(a, b);
    }

    #[test]
    fn event_hash_varies_with_source() {
        let root = EventHash::root();
        let a = event_hash("IP_ADDRESS", "1.2.3.4", Some(&root));
        let b = event_hash("IP_ADDRESS", "1.2.3.4", None);
        assert_ne!(a, b);
    }

    #[test]
    fn correlation_id_ignores_order() {
        let h1 = event_hash("A", "1", None);
        let h2 = event_hash("B", "2", None);
        let fwd = correlation_id("rule", &[h1.clone(), h2.clone()]);
        let rev = correlation_id("rule", &[h2, h1]);
        assert_eq!(fwd, rev);
    }

    #[test]
    fn golden_hash_bytes() {
        // SHA-256 of "test" = 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
        assert_eq!(
            hash_bytes(b"test"),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }
}
