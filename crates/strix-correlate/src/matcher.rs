// crates/strix-correlate/src/matcher.rs
// ============================================================================
// Module: Correlation Matcher
// Description: Event graph resolution and method predicates.
// Purpose: Resolve rule field references and apply match filters to events.
// Dependencies: strix-core, regex
// ============================================================================

//! ## Overview
//! Rules address events through field references: bare fields read the event
//! itself, `source.*` its parent, `child.*` the events it produced, and
//! `entity.*` its nearest ancestor whose type is in the entity set (an event
//! that is itself an entity anchors to itself). The graph is built once per
//! rule evaluation from the stored event list and resolutions are memoized;
//! correlation never depends on delivery order, only on these links.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use regex::Regex;
use strix_core::Event;
use strix_core::EventHash;
use strix_core::core::event::is_entity_type;

use crate::rule::MatchKind;
use crate::rule::MethodBlock;

// ============================================================================
// SECTION: Event Graph
// ============================================================================

/// In-memory event graph for one rule evaluation.
///
/// # Invariants
/// - Built from a single scan snapshot; never mutated during evaluation.
pub struct EventGraph {
    /// All events in storage order.
    events: Vec<Event>,
    /// Index by event hash.
    by_hash: HashMap<EventHash, usize>,
    /// Child indexes by parent hash.
    children: HashMap<EventHash, Vec<usize>>,
}

impl EventGraph {
    /// Builds the graph from a scan's stored events.
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        let mut by_hash = HashMap::with_capacity(events.len());
        let mut children: HashMap<EventHash, Vec<usize>> = HashMap::new();
        for (index, event) in events.iter().enumerate() {
            by_hash.insert(event.hash.clone(), index);
            if let Some(source) = &event.source_hash {
                children.entry(source.clone()).or_default().push(index);
            }
        }
        Self {
            events,
            by_hash,
            children,
        }
    }

    /// Returns all events in storage order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the event at a graph index.
    #[must_use]
    pub fn event(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    /// Returns the parent of an event, when present.
    #[must_use]
    pub fn source_of(&self, event: &Event) -> Option<&Event> {
        let source = event.source_hash.as_ref()?;
        self.by_hash.get(source).map(|index| &self.events[*index])
    }

    /// Returns the children of an event.
    #[must_use]
    pub fn children_of(&self, event: &Event) -> Vec<&Event> {
        self.children
            .get(&event.hash)
            .map(|indexes| indexes.iter().map(|index| &self.events[*index]).collect())
            .unwrap_or_default()
    }

    /// Walks ancestors until an entity-typed event is found.
    ///
    /// An event whose own type is an entity type anchors to itself. The walk
    /// is bounded by the event count, so malformed graphs cannot loop.
    #[must_use]
    pub fn entity_of<'a>(&'a self, event: &'a Event) -> Option<&'a Event> {
        let mut current = event;
        for _ in 0 ..= self.events.len() {
            if is_entity_type(&current.event_type) {
                return Some(current);
            }
            current = self.source_of(current)?;
        }
        None
    }

    /// Resolves a field reference to its values for one event.
    ///
    /// Bare fields yield one value; `child.*` may yield many; `source.*` and
    /// `entity.*` yield at most one.
    #[must_use]
    pub fn resolve(&self, event: &Event, field: &str) -> Vec<String> {
        match field.split_once('.') {
            None => base_field(event, field).into_iter().collect(),
            Some(("source", base)) => self
                .source_of(event)
                .and_then(|source| base_field(source, base))
                .into_iter()
                .collect(),
            Some(("child", base)) => self
                .children_of(event)
                .into_iter()
                .filter_map(|child| base_field(child, base))
                .collect(),
            Some(("entity", base)) => self
                .entity_of(event)
                .and_then(|entity| base_field(entity, base))
                .into_iter()
                .collect(),
            Some(_) => Vec::new(),
        }
    }
}

/// Reads a bare field from an event.
fn base_field(event: &Event, field: &str) -> Option<String> {
    match field {
        "type" => Some(event.event_type.clone()),
        "module" => Some(event.module.as_str().to_string()),
        "data" => Some(event.data.clone()),
        "risk" => Some(event.risk.to_string()),
        _ => None,
    }
}

// ============================================================================
// SECTION: Method Predicates
// ============================================================================

/// One compiled match value.
enum Pattern {
    /// Positive exact comparison.
    Exact(String),
    /// Negative exact comparison.
    NotExact(String),
    /// Positive regex search.
    Regex(Regex),
    /// Negative regex search.
    NotRegex(Regex),
}

impl Pattern {
    /// Returns true when this is a negated pattern.
    const fn is_negative(&self) -> bool {
        matches!(self, Self::NotExact(_) | Self::NotRegex(_))
    }

    /// Returns true when the value matches the underlying pattern.
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(expected) | Self::NotExact(expected) => value == expected,
            Self::Regex(regex) | Self::NotRegex(regex) => regex.is_match(value),
        }
    }
}

/// Compiled method filter applied to a working set.
pub(crate) struct CompiledMethod {
    /// Field reference resolved per event.
    field: String,
    /// Compiled match values.
    patterns: Vec<Pattern>,
}

impl CompiledMethod {
    /// Compiles a method block; regexes were validated at load time.
    pub(crate) fn compile(block: &MethodBlock) -> Option<Self> {
        let mut patterns = Vec::with_capacity(block.value.len());
        for raw in &block.value {
            let (negated, body) = match raw.strip_prefix("not ") {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let pattern = match block.method {
                MatchKind::Exact if negated => Pattern::NotExact(body.to_string()),
                MatchKind::Exact => Pattern::Exact(body.to_string()),
                MatchKind::Regex => {
                    let regex = Regex::new(body).ok()?;
                    if negated {
                        Pattern::NotRegex(regex)
                    } else {
                        Pattern::Regex(regex)
                    }
                }
            };
            patterns.push(pattern);
        }
        Some(Self {
            field: block.field.clone(),
            patterns,
        })
    }

    /// Returns true when the event passes this filter.
    ///
    /// With multiple values the event must match at least one positive value
    /// (when any exist) and no negative value. Events whose field reference
    /// resolves to nothing never pass.
    pub(crate) fn accepts(&self, graph: &EventGraph, event: &Event) -> bool {
        let values = graph.resolve(event, &self.field);
        if values.is_empty() {
            return false;
        }
        let has_positive = self.patterns.iter().any(|pattern| !pattern.is_negative());
        let positive_hit = !has_positive
            || self
                .patterns
                .iter()
                .filter(|pattern| !pattern.is_negative())
                .any(|pattern| values.iter().any(|value| pattern.matches(value)));
        let negative_hit = self
            .patterns
            .iter()
            .filter(|pattern| pattern.is_negative())
            .any(|pattern| values.iter().any(|value| pattern.matches(value)));
        positive_hit && !negative_hit
    }
}

// ============================================================================
// SECTION: Subnet Matching
// ============================================================================

/// Returns true when `address` is an IPv4 address inside the IPv4 `netblock`.
///
/// IPv6 operands parse but never match; IPv6 containment is
/// implementation-defined for this method.
#[must_use]
pub(crate) fn subnet_contains(netblock: &str, address: &str) -> bool {
    let Some((base, prefix)) = netblock.split_once('/') else {
        return false;
    };
    let (Ok(base), Ok(prefix)) = (base.parse::<std::net::Ipv4Addr>(), prefix.parse::<u8>())
    else {
        return false;
    };
    if prefix > 32 {
        return false;
    }
    let Ok(address) = address.parse::<std::net::Ipv4Addr>() else {
        return false;
    };
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    (u32::from(base) & mask) == (u32::from(address) & mask)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use strix_core::EventDraft;
    use strix_core::ModuleName;
    use strix_core::event_types;

    use super::*;

    /// Builds seed -> host -> banner chain.
    fn chain() -> Vec<Event> {
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        let host = EventDraft::new(event_types::INTERNET_NAME, "www.example.com")
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        let banner = EventDraft::new(event_types::WEBSERVER_BANNER, "nginx")
            .into_event(ModuleName::from_static("sfp_stub"), &host.hash);
        vec![seed, host, banner]
    }

    #[test]
    fn source_resolution_reads_parent() {
        let events = chain();
        let graph = EventGraph::new(events.clone());
        let values = graph.resolve(&events[2], "source.data");
        assert_eq!(values, vec!["www.example.com".to_string()]);
    }

    #[test]
    fn child_resolution_reads_children() {
        let events = chain();
        let graph = EventGraph::new(events.clone());
        let values = graph.resolve(&events[0], "child.type");
        assert_eq!(values, vec![event_types::INTERNET_NAME.to_string()]);
    }

    #[test]
    fn entity_resolution_walks_to_anchor() {
        let events = chain();
        let graph = EventGraph::new(events.clone());
        // The banner is not an entity; its nearest entity ancestor is the host.
        let values = graph.resolve(&events[2], "entity.data");
        assert_eq!(values, vec!["www.example.com".to_string()]);
        // The host is an entity itself.
        let values = graph.resolve(&events[1], "entity.data");
        assert_eq!(values, vec!["www.example.com".to_string()]);
    }

    #[test]
    fn negated_regex_drops_matches() {
        let events = chain();
        let graph = EventGraph::new(events.clone());
        let method = CompiledMethod::compile(&MethodBlock {
            method: MatchKind::Regex,
            field: "data".to_string(),
            value: vec!["not ngin.*".to_string()],
        })
        .unwrap();
        assert!(!method.accepts(&graph, &events[2]));
        assert!(method.accepts(&graph, &events[1]));
    }

    #[test]
    fn value_list_matches_any() {
        let events = chain();
        let graph = EventGraph::new(events.clone());
        let method = CompiledMethod::compile(&MethodBlock {
            method: MatchKind::Exact,
            field: "type".to_string(),
            value: vec![
                event_types::WEBSERVER_BANNER.to_string(),
                event_types::INTERNET_NAME.to_string(),
            ],
        })
        .unwrap();
        assert!(method.accepts(&graph, &events[1]));
        assert!(method.accepts(&graph, &events[2]));
        assert!(!method.accepts(&graph, &events[0]));
    }

    #[test]
    fn subnet_contains_ipv4() {
        assert!(subnet_contains("1.2.3.0/24", "1.2.3.4"));
        assert!(!subnet_contains("1.2.3.0/24", "1.2.4.4"));
        assert!(subnet_contains("0.0.0.0/0", "8.8.8.8"));
        assert!(!subnet_contains("1.2.3.0/24", "2001:db8::1"));
    }
}
