// crates/strix-correlate/src/engine.rs
// ============================================================================
// Module: Correlation Engine
// Description: Collect, aggregate, analyze, and headline evaluation.
// Purpose: Produce correlation records as a pure function of stored events.
// Dependencies: strix-core, regex, thiserror, tracing
// ============================================================================

//! ## Overview
//! One rule pass loads a scan's events into an [`EventGraph`], pulls and
//! filters events per collect block, partitions them into buckets, narrows
//! the buckets with analysis methods, and renders one correlation per
//! surviving bucket. Evaluation is deterministic: buckets iterate in key
//! order and correlation identifiers hash the rule id with the sorted
//! contributing event hashes, so re-running a pass reproduces the same ids.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use strix_core::CorrelationRecord;
use strix_core::CorrelationRunError;
use strix_core::CorrelationRunner;
use strix_core::EventStore;
use strix_core::LogEntry;
use strix_core::LogLevel;
use strix_core::ScanId;
use strix_core::StoreError;
use strix_core::hashing;
use thiserror::Error;

use crate::matcher::CompiledMethod;
use crate::matcher::EventGraph;
use crate::matcher::subnet_contains;
use crate::rule::AnalysisBlock;
use crate::rule::CorrelationRule;
use crate::rule::FirstCollectionMatch;
use crate::rule::Headline;
use crate::rule::RuleScope;
use crate::rule::RuleSet;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Correlation engine errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Per-rule evaluation failures are absorbed and logged, never raised.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure local to one rule's evaluation.
#[derive(Debug, Error)]
enum RulePassError {
    /// Store read or write failed mid-pass.
    #[error("store failure during rule pass: {0}")]
    Store(#[from] StoreError),
    /// A method filter failed to compile.
    #[error("method filter failed to compile")]
    BadMethod,
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result summary of one correlation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Rules evaluated.
    pub rules_run: usize,
    /// Correlation results written.
    pub results: usize,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Engine component label used on durable log entries.
const ENGINE_COMPONENT: &str = "correlation";

/// Declarative correlation engine over an event store.
///
/// # Invariants
/// - Rules are immutable after construction and shared read-only.
/// - Safe to re-run; identical inputs yield identical correlation ids.
pub struct CorrelationEngine {
    /// Store read for events and written with results.
    store: Arc<dyn EventStore>,
    /// Loaded rule set.
    rules: Arc<RuleSet>,
}

impl CorrelationEngine {
    /// Creates an engine over the given store and rules.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, rules: Arc<RuleSet>) -> Self {
        Self {
            store,
            rules,
        }
    }

    /// Returns the loaded rule set.
    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Runs rules over one scan's stored events.
    ///
    /// With `rule_ids` the run is restricted to the named rules; unknown ids
    /// are skipped with a warning. Per-rule failures are logged to the scan
    /// and do not stop the pass.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the scan cannot be read at all.
    pub fn run_scan(
        &self,
        scan: &ScanId,
        rule_ids: Option<&[String]>,
    ) -> Result<RunOutcome, EngineError> {
        // Fail fast on unknown scans before touching any rule.
        self.store.get_scan(scan)?;
        let selected: Vec<&CorrelationRule> = match rule_ids {
            None => self.rules.rules().iter().collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    let rule = self.rules.get(id);
                    if rule.is_none() {
                        tracing::warn!(rule = %id, "unknown correlation rule requested");
                    }
                    rule
                })
                .collect(),
        };
        let mut outcome = RunOutcome::default();
        for rule in selected {
            outcome.rules_run += 1;
            match self.run_rule(scan, rule) {
                Ok(written) => outcome.results += written,
                Err(err) => {
                    tracing::error!(
                        scan = %scan,
                        rule = %rule.descriptor.rule_id,
                        error = %err,
                        "rule evaluation failed"
                    );
                    let entry = LogEntry::new(
                        ENGINE_COMPONENT,
                        LogLevel::Error,
                        format!("rule {} failed: {err}", rule.descriptor.rule_id),
                    );
                    let _ = self.store.append_log(scan, &entry);
                }
            }
        }
        Ok(outcome)
    }

    /// Evaluates one rule and writes its correlations.
    fn run_rule(&self, scan: &ScanId, rule: &CorrelationRule) -> Result<usize, RulePassError> {
        let events = match rule.scope {
            RuleScope::Scan => self.store.all_events(scan)?,
            RuleScope::Workspace => {
                // Workspace scope evaluates over every scan in the store; the
                // produced correlations are written to the scan being run and
                // link only the hashes present in it.
                let mut events = Vec::new();
                for row in self.store.list_scans()? {
                    events.extend(self.store.all_events(&row.scan_id)?);
                }
                events
            }
        };
        let local_hashes: BTreeSet<String> = if rule.scope == RuleScope::Workspace {
            self.store
                .all_events(scan)?
                .into_iter()
                .map(|event| event.hash.as_str().to_string())
                .collect()
        } else {
            BTreeSet::new()
        };
        let graph = EventGraph::new(events);
        let records = evaluate(rule, &graph).ok_or(RulePassError::BadMethod)?;
        let mut written = 0;
        for mut record in records {
            if rule.scope == RuleScope::Workspace {
                record.events.retain(|hash| local_hashes.contains(hash.as_str()));
                if record.events.is_empty() {
                    continue;
                }
                record.correlation_id =
                    hashing::correlation_id(&rule.descriptor.rule_id, &record.events);
            }
            self.store.write_correlation(scan, &record)?;
            written += 1;
        }
        Ok(written)
    }
}

impl CorrelationRunner for CorrelationEngine {
    fn run(&self, scan: &ScanId) -> Result<usize, CorrelationRunError> {
        self.run_scan(scan, None)
            .map(|outcome| outcome.results)
            .map_err(|err| CorrelationRunError::Failed(err.to_string()))
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// One collected event tagged with its collection index.
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Index into the event graph.
    event: usize,
    /// Collect block the entry came from.
    collection: usize,
}

/// Evaluates a rule against a graph, returning correlation records.
///
/// Returns `None` only when a validated method fails to compile, which
/// indicates a load/validate mismatch rather than a data problem.
fn evaluate(rule: &CorrelationRule, graph: &EventGraph) -> Option<Vec<CorrelationRecord>> {
    // Collect phase: the first method pulls, later methods narrow.
    let mut collected: Vec<Vec<Entry>> = Vec::with_capacity(rule.collections.len());
    for (collection_index, block) in rule.collections.iter().enumerate() {
        let mut working: Vec<usize> = Vec::new();
        for (method_index, method) in block.collect.iter().enumerate() {
            let compiled = CompiledMethod::compile(method)?;
            if method_index == 0 {
                working = (0 .. graph.events().len())
                    .filter(|index| {
                        graph
                            .event(*index)
                            .is_some_and(|event| compiled.accepts(graph, event))
                    })
                    .collect();
            } else {
                working.retain(|index| {
                    graph
                        .event(*index)
                        .is_some_and(|event| compiled.accepts(graph, event))
                });
            }
        }
        collected.push(
            working
                .into_iter()
                .map(|event| Entry {
                    event,
                    collection: collection_index,
                })
                .collect(),
        );
    }
    let pool: Vec<Entry> = collected.iter().flatten().copied().collect();

    // Aggregate phase: bucket by field value, dropping empty keys.
    let mut buckets: BTreeMap<String, Vec<Entry>> = BTreeMap::new();
    if let Some(field) = &rule.aggregation {
        for entry in &pool {
            let Some(event) = graph.event(entry.event) else {
                continue;
            };
            let Some(key) = graph.resolve(event, field).into_iter().next() else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            buckets.entry(key).or_default().push(*entry);
        }
    } else if !pool.is_empty() {
        buckets.insert(String::new(), pool.clone());
    }

    // Analysis phase: each method narrows the candidate set in order.
    for block in &rule.analysis {
        match block {
            AnalysisBlock::Threshold {
                field,
                minimum,
                maximum,
                count_unique_only,
            } => apply_threshold(graph, &mut buckets, field, *minimum, *maximum, *count_unique_only),
            AnalysisBlock::Outlier {
                maximum_percent,
                noisy_percent,
            } => apply_outlier(&mut buckets, *maximum_percent, *noisy_percent),
            AnalysisBlock::FirstCollectionOnly {
                field,
            } => apply_first_collection_only(graph, &mut buckets, field),
            AnalysisBlock::MatchAllToFirstCollection {
                field,
                match_method,
            } => apply_match_all_to_first(graph, &mut buckets, field, *match_method),
        }
        buckets.retain(|_, entries| !entries.is_empty());
    }

    // Emit phase: one correlation per surviving bucket.
    let publish: Option<&Vec<usize>> = match &rule.headline {
        Headline::Block {
            publish_collections: Some(collections),
            ..
        } => Some(collections),
        _ => None,
    };
    let mut records = Vec::with_capacity(buckets.len());
    for (key, entries) in &buckets {
        let published: Vec<Entry> = entries
            .iter()
            .filter(|entry| publish.is_none_or(|allowed| allowed.contains(&entry.collection)))
            .copied()
            .collect();
        if published.is_empty() {
            continue;
        }
        let mut hashes = Vec::new();
        let mut seen = BTreeSet::new();
        for entry in &published {
            if let Some(event) = graph.event(entry.event)
                && seen.insert(event.hash.as_str().to_string())
            {
                hashes.push(event.hash.clone());
            }
        }
        let representative = published
            .first()
            .and_then(|entry| graph.event(entry.event));
        let title = render_headline(
            rule.headline.text(),
            rule.aggregation.as_deref(),
            key,
            representative.map(|event| (graph, event)),
        );
        records.push(CorrelationRecord {
            correlation_id: hashing::correlation_id(&rule.descriptor.rule_id, &hashes),
            rule: rule.descriptor.clone(),
            title,
            events: hashes,
        });
    }
    Some(records)
}

// ============================================================================
// SECTION: Analysis Methods
// ============================================================================

/// Drops buckets whose field count is outside the inclusive range.
fn apply_threshold(
    graph: &EventGraph,
    buckets: &mut BTreeMap<String, Vec<Entry>>,
    field: &str,
    minimum: Option<u64>,
    maximum: Option<u64>,
    count_unique_only: bool,
) {
    let minimum = minimum.unwrap_or(0);
    let maximum = maximum.unwrap_or(u64::MAX);
    buckets.retain(|_, entries| {
        let values: Vec<String> = entries
            .iter()
            .filter_map(|entry| graph.event(entry.event))
            .flat_map(|event| graph.resolve(event, field))
            .collect();
        let count = if count_unique_only {
            values.iter().collect::<BTreeSet<_>>().len() as u64
        } else {
            values.len() as u64
        };
        count >= minimum && count <= maximum
    });
}

/// Keeps only buckets representing at most `maximum_percent` of the dataset.
///
/// A dataset with a single bucket has no outliers. When the average bucket
/// share falls below `noisy_percent`, the whole dataset is treated as noise
/// and nothing is emitted.
fn apply_outlier(buckets: &mut BTreeMap<String, Vec<Entry>>, maximum_percent: u64, noisy_percent: u64) {
    let total: usize = buckets.values().map(Vec::len).sum();
    if buckets.len() <= 1 || total == 0 {
        buckets.clear();
        return;
    }
    let average_percent = 100.0 / buckets.len() as f64;
    if average_percent < noisy_percent as f64 {
        buckets.clear();
        return;
    }
    buckets.retain(|_, entries| {
        let share = entries.len() as f64 * 100.0 / total as f64;
        share <= maximum_percent as f64
    });
}

/// Keeps first-collection entries whose field value appears in no other
/// collection.
fn apply_first_collection_only(
    graph: &EventGraph,
    buckets: &mut BTreeMap<String, Vec<Entry>>,
    field: &str,
) {
    let mut other_values: BTreeSet<String> = BTreeSet::new();
    for entries in buckets.values() {
        for entry in entries {
            if entry.collection == 0 {
                continue;
            }
            if let Some(event) = graph.event(entry.event) {
                other_values.extend(graph.resolve(event, field));
            }
        }
    }
    for entries in buckets.values_mut() {
        entries.retain(|entry| {
            entry.collection == 0
                && graph.event(entry.event).is_some_and(|event| {
                    graph
                        .resolve(event, field)
                        .iter()
                        .all(|value| !other_values.contains(value))
                })
        });
    }
}

/// Keeps entries whose field matches a first-collection value.
fn apply_match_all_to_first(
    graph: &EventGraph,
    buckets: &mut BTreeMap<String, Vec<Entry>>,
    field: &str,
    match_method: FirstCollectionMatch,
) {
    let mut first_values: BTreeSet<String> = BTreeSet::new();
    for entries in buckets.values() {
        for entry in entries {
            if entry.collection != 0 {
                continue;
            }
            if let Some(event) = graph.event(entry.event) {
                first_values.extend(graph.resolve(event, field));
            }
        }
    }
    let matches_first = |value: &str| -> bool {
        first_values.iter().any(|first| match match_method {
            FirstCollectionMatch::Exact => first == value,
            FirstCollectionMatch::Contains => first.contains(value) || value.contains(first),
            FirstCollectionMatch::Subnet => subnet_contains(first, value),
        })
    };
    for entries in buckets.values_mut() {
        entries.retain(|entry| {
            entry.collection == 0
                || graph.event(entry.event).is_some_and(|event| {
                    graph.resolve(event, field).iter().any(|value| matches_first(value))
                })
        });
    }
}

// ============================================================================
// SECTION: Headline Rendering
// ============================================================================

/// Token pattern replaced in headline templates.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+(?:\.[a-z_]+)?)\}").unwrap());

/// Renders a headline template for one bucket.
///
/// The aggregation field token takes the bucket key; other tokens resolve on
/// the representative entry.
fn render_headline(
    template: &str,
    aggregation: Option<&str>,
    bucket_key: &str,
    representative: Option<(&EventGraph, &strix_core::Event)>,
) -> String {
    TOKEN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let token = &caps[1];
            if aggregation == Some(token) {
                return bucket_key.to_string();
            }
            representative
                .and_then(|(graph, event)| graph.resolve(event, token).into_iter().next())
                .unwrap_or_else(|| bucket_key.to_string())
        })
        .into_owned()
}
