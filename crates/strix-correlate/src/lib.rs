// crates/strix-correlate/src/lib.rs
// ============================================================================
// Module: Strix Correlate Library
// Description: Declarative YAML correlation rules over stored scan events.
// Purpose: Surface patterns in scan data through a collect/aggregate/analyze pipeline.
// Dependencies: strix-core, serde_yaml, regex, thiserror, tracing
// ============================================================================

//! ## Overview
//! Correlation rules are YAML documents evaluated as a pure function of a
//! scan's stored events: `collect` blocks pull and filter events (with
//! `source.`, `child.`, and `entity.` graph references), an optional
//! `aggregation` partitions them into buckets, `analysis` methods narrow the
//! candidate set, and a `headline` template renders each surviving bucket
//! into a correlation result.
//! Invariants:
//! - Rule ids equal their file stems.
//! - A rule that fails to load or evaluate never affects other rules.
//! - Re-running a rule over unchanged events reproduces identical
//!   correlation identifiers.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod engine;
pub mod matcher;
pub mod rule;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use engine::CorrelationEngine;
pub use engine::EngineError;
pub use engine::RunOutcome;
pub use matcher::EventGraph;
pub use rule::AnalysisBlock;
pub use rule::CollectBlock;
pub use rule::CorrelationRule;
pub use rule::FirstCollectionMatch;
pub use rule::Headline;
pub use rule::MatchKind;
pub use rule::MethodBlock;
pub use rule::RuleError;
pub use rule::RuleLoadFailure;
pub use rule::RuleScope;
pub use rule::RuleSet;
