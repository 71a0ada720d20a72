// crates/strix-core/src/core/summary.rs
// ============================================================================
// Module: Strix Read Models
// Description: Query-layer rows served to external adapters.
// Purpose: Define the cheap read shapes derived from stored scan data.
// Dependencies: serde, crate::core::{identifiers, state, time}
// ============================================================================

//! ## Overview
//! These types are the read side of the engine: per-type summaries, unique
//! value counts, the event graph projection for visualization, scan listing
//! rows, and correlation results. They carry no behavior beyond display
//! helpers; adapters serialize them directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::EventHash;
use crate::core::identifiers::ScanId;
use crate::core::state::ScanStatus;
use crate::core::state::StatusError;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Summary Rows
// ============================================================================

/// Per-event-type totals for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Event type key.
    pub key: String,
    /// Human description of the event type.
    pub description: String,
    /// Total events of this type.
    pub total: u64,
    /// Distinct data values of this type.
    pub unique_total: u64,
}

/// Distinct data value count for one event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueRow {
    /// Event data value.
    pub data: String,
    /// Occurrences of the value.
    pub count: u64,
}

// ============================================================================
// SECTION: Scan Listing
// ============================================================================

/// Row in the scan listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanListRow {
    /// Scan identifier.
    pub scan_id: ScanId,
    /// Display name.
    pub name: String,
    /// Seed target value.
    pub seed_target: String,
    /// Classified seed target type.
    pub seed_type: String,
    /// Row creation time.
    pub created: Timestamp,
    /// Lifecycle status.
    pub status: ScanStatus,
    /// Total events recorded for the scan.
    pub event_count: u64,
}

// ============================================================================
// SECTION: Viz Graph
// ============================================================================

/// Node in the event graph projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VizNode {
    /// Event hash backing the node.
    pub id: EventHash,
    /// Event type.
    pub event_type: String,
    /// Event payload shown as the node label.
    pub label: String,
    /// Risk score carried by the event.
    pub risk: u8,
}

/// Directed edge from a source event to a produced event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VizEdge {
    /// Parent event hash.
    pub source: EventHash,
    /// Child event hash.
    pub target: EventHash,
}

/// Event graph projection for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VizGraph {
    /// Graph nodes, one per stored event.
    pub nodes: Vec<VizNode>,
    /// Graph edges following `source_hash` links.
    pub edges: Vec<VizEdge>,
}

// ============================================================================
// SECTION: Correlations
// ============================================================================

/// Risk level attached to a correlation rule.
///
/// # Invariants
/// - Variants are stable for serialization and rule-file matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleRisk {
    /// Informational finding.
    #[serde(rename = "INFO")]
    Info,
    /// Low risk finding.
    #[serde(rename = "LOW")]
    Low,
    /// Medium risk finding.
    #[serde(rename = "MEDIUM")]
    Medium,
    /// High risk finding.
    #[serde(rename = "HIGH")]
    High,
    /// Critical risk finding.
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl RuleRisk {
    /// Returns the stable wire label for the risk level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Parses a stored wire label.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::UnknownLabel`] for unrecognized labels.
    pub fn parse(label: &str) -> Result<Self, StatusError> {
        match label {
            "INFO" => Ok(Self::Info),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(StatusError::UnknownLabel(other.to_string())),
        }
    }
}

impl fmt::Display for RuleRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of the rule that produced a correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    /// Rule identifier (file stem).
    pub rule_id: String,
    /// Human rule name.
    pub name: String,
    /// Rule description.
    pub description: String,
    /// Rule risk level.
    pub risk: RuleRisk,
    /// Serialized rule logic for audit display.
    pub logic: String,
}

/// Correlation result with links to contributing events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    /// Deterministic correlation identifier.
    pub correlation_id: CorrelationId,
    /// Descriptor of the producing rule.
    pub rule: RuleDescriptor,
    /// Rendered headline.
    pub title: String,
    /// Hashes of the contributing events.
    pub events: Vec<EventHash>,
}
