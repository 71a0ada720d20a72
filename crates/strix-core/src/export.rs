// crates/strix-core/src/export.rs
// ============================================================================
// Module: Strix Event Export
// Description: CSV, JSON, and GEXF encoders over stored events.
// Purpose: Serve identical export bytes to the REST adapter and the CLI.
// Dependencies: serde_json, crate::core::event
// ============================================================================

//! ## Overview
//! Exports are pure functions of the event list, so export → import → export
//! round-trips are byte-identical apart from timestamp fields. CSV escaping
//! follows RFC 4180; GEXF emits one node per event and one edge per
//! `source_hash` link.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::event::Event;

// ============================================================================
// SECTION: Format
// ============================================================================

/// Supported export encodings.
///
/// # Invariants
/// - Variants are stable for serialization and adapter matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// RFC 4180 CSV.
    Csv,
    /// Pretty-printed JSON array.
    Json,
    /// GEXF 1.2 graph document.
    Gexf,
}

impl ExportFormat {
    /// Parses a format label.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Unsupported`] for unknown labels, including the
    /// report formats handled outside the core (`xlsx`, `stix`).
    pub fn parse(label: &str) -> Result<Self, ExportError> {
        match label.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "gexf" => Ok(Self::Gexf),
            other => Err(ExportError::Unsupported(other.to_string())),
        }
    }

    /// Returns the media type for HTTP responses.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
            Self::Gexf => "application/xml",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Json => f.write_str("json"),
            Self::Gexf => f.write_str("gexf"),
        }
    }
}

/// Export errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExportError {
    /// Requested format is not encoded by the core.
    #[error("unsupported export format: {0}")]
    Unsupported(String),
    /// Encoding failed.
    #[error("export encoding failed: {0}")]
    Encoding(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Encodes events into the requested format.
///
/// # Errors
///
/// Returns [`ExportError::Encoding`] when serialization fails.
pub fn export_events(events: &[Event], format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => Ok(encode_csv(events)),
        ExportFormat::Json => serde_json::to_vec_pretty(events)
            .map_err(|err| ExportError::Encoding(err.to_string())),
        ExportFormat::Gexf => Ok(encode_gexf(events)),
    }
}

// ============================================================================
// SECTION: CSV
// ============================================================================

/// CSV column header row.
const CSV_HEADER: &str =
    "generated,type,module,data,source_hash,confidence,visibility,risk,false_positive,hash";

/// Encodes events as RFC 4180 CSV.
fn encode_csv(events: &[Event]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");
    for event in events {
        let source = event
            .source_hash
            .as_ref()
            .map_or(String::new(), |hash| hash.as_str().to_string());
        let fields = [
            format!("{}", event.generated),
            event.event_type.clone(),
            event.module.as_str().to_string(),
            event.data.clone(),
            source,
            event.confidence.to_string(),
            event.visibility.to_string(),
            event.risk.to_string(),
            event.false_positive.to_string(),
            event.hash.as_str().to_string(),
        ];
        let row: Vec<String> = fields.iter().map(|field| csv_field(field)).collect();
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out.into_bytes()
}

/// Quotes a CSV field when it contains separators, quotes, or newlines.
fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

// ============================================================================
// SECTION: GEXF
// ============================================================================

/// Encodes the event graph as a GEXF 1.2 document.
fn encode_gexf(events: &[Event]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<gexf xmlns=\"http://www.gexf.net/1.2draft\" version=\"1.2\">\n");
    out.push_str("  <graph mode=\"static\" defaultedgetype=\"directed\">\n");
    out.push_str("    <nodes>\n");
    for event in events {
        out.push_str(&format!(
            "      <node id=\"{}\" label=\"{}\"/>\n",
            xml_escape(event.hash.as_str()),
            xml_escape(&event.data)
        ));
    }
    out.push_str("    </nodes>\n    <edges>\n");
    for (index, event) in events.iter().enumerate() {
        if let Some(source) = &event.source_hash {
            out.push_str(&format!(
                "      <edge id=\"{}\" source=\"{}\" target=\"{}\"/>\n",
                index,
                xml_escape(source.as_str()),
                xml_escape(event.hash.as_str())
            ));
        }
    }
    out.push_str("    </edges>\n  </graph>\n</gexf>\n");
    out.into_bytes()
}

/// Escapes XML attribute metacharacters.
fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;
    use crate::core::event::EventDraft;
    use crate::core::event::event_types;
    use crate::core::identifiers::ModuleName;

    /// Builds a two-event fixture: a seed and one child.
    fn fixture() -> Vec<Event> {
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        let child = EventDraft::new(event_types::IP_ADDRESS, "93.184.216.34")
            .into_event(ModuleName::from_static("sfp_dnsresolve"), &seed.hash);
        vec![seed, child]
    }

    #[test]
    fn csv_has_header_and_rows() {
        let bytes = export_events(&fixture(), ExportFormat::Csv).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(CSV_HEADER));
        assert_eq!(text.matches("\r\n").count(), 3);
    }

    #[test]
    fn csv_quotes_embedded_commas() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("plain"), "plain");
    }

    #[test]
    fn json_round_trips() {
        let events = fixture();
        let bytes = export_events(&events, ExportFormat::Json).unwrap();
        let decoded: Vec<Event> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, events);
        let again = export_events(&decoded, ExportFormat::Json).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn gexf_links_child_to_seed() {
        let events = fixture();
        let bytes = export_events(&events, ExportFormat::Gexf).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(&format!("source=\"{}\"", events[0].hash)));
        assert!(text.contains(&format!("target=\"{}\"", events[1].hash)));
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert_eq!(
            ExportFormat::parse("xlsx"),
            Err(ExportError::Unsupported("xlsx".to_string()))
        );
    }
}
