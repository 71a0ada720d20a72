// crates/strix-correlate/src/rule.rs
// ============================================================================
// Module: Correlation Rule Schema
// Description: YAML rule parsing, validation, and directory loading.
// Purpose: Load declarative rules fail-closed with per-file error isolation.
// Dependencies: serde, serde_yaml, strix-core, thiserror
// ============================================================================

//! ## Overview
//! Rules are YAML files whose stem is the rule id. Parsing is strict: unknown
//! keys are rejected, `version` must be `1`, and every referenced regex must
//! compile. A file that fails to parse is recorded and skipped; surviving
//! rules still load.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use strix_core::RuleDescriptor;
use strix_core::RuleRisk;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Only rule schema version accepted by this engine.
const SUPPORTED_VERSION: u32 = 1;
/// Maximum rule file size in bytes.
const MAX_RULE_FILE_SIZE: u64 = 256 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Rule parsing and validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum RuleError {
    /// File could not be read.
    #[error("rule file unreadable: {0}")]
    Io(String),
    /// File exceeded the size cap.
    #[error("rule file too large: {actual} bytes (max {max})")]
    TooLarge {
        /// Maximum allowed size.
        max: u64,
        /// Observed size.
        actual: u64,
    },
    /// YAML failed to parse or carried unknown keys.
    #[error("rule yaml invalid: {0}")]
    Yaml(String),
    /// Declared id does not equal the file stem.
    #[error("rule id {id} does not match file stem {stem}")]
    IdMismatch {
        /// Declared rule id.
        id: String,
        /// File stem.
        stem: String,
    },
    /// Unsupported schema version.
    #[error("unsupported rule version: {0}")]
    Version(u32),
    /// Rule has no collect blocks.
    #[error("rule has no collections")]
    EmptyCollections,
    /// A collect block has no methods.
    #[error("collect block {0} has no methods")]
    EmptyCollect(usize),
    /// A regex value failed to compile.
    #[error("invalid regex in rule: {0}")]
    Regex(String),
    /// A field reference is not recognized.
    #[error("invalid field reference: {0}")]
    Field(String),
}

/// Load failure recorded for one file while scanning a rules directory.
#[derive(Debug)]
pub struct RuleLoadFailure {
    /// Offending file path.
    pub path: PathBuf,
    /// Parse or validation error.
    pub error: RuleError,
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Raw rule document as parsed from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDocument {
    /// Rule identifier; must equal the file stem.
    id: String,
    /// Schema version; must be 1.
    version: u32,
    /// Rule metadata.
    meta: MetaBlock,
    /// Ordered collect blocks.
    collections: Vec<CollectBlock>,
    /// Optional aggregation spec.
    #[serde(default)]
    aggregation: Option<AggregationBlock>,
    /// Optional ordered analysis methods.
    #[serde(default)]
    analysis: Option<Vec<AnalysisBlock>>,
    /// Headline template.
    headline: Headline,
}

/// Rule metadata block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetaBlock {
    /// Human rule name.
    name: String,
    /// Rule description.
    description: String,
    /// Risk level attached to produced correlations.
    risk: RuleRisk,
    /// Evaluation scope; defaults to one scan.
    #[serde(default)]
    scope: RuleScope,
}

/// Evaluation scope of a rule.
///
/// # Invariants
/// - Variants are stable for rule-file matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Evaluate over one scan's events.
    #[default]
    Scan,
    /// Evaluate over events from every scan in the enclosing collection.
    Workspace,
}

/// One collect block: an ordered list of method filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectBlock {
    /// Ordered method filters; the first pulls, the rest narrow.
    pub collect: Vec<MethodBlock>,
}

/// Match style of a collect method.
///
/// # Invariants
/// - Variants are stable for rule-file matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Literal string equality.
    Exact,
    /// Regular expression search.
    Regex,
}

/// One method filter inside a collect block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodBlock {
    /// Match style.
    pub method: MatchKind,
    /// Field reference, optionally prefixed with `source.`, `child.`, or
    /// `entity.` on methods after the first.
    pub field: String,
    /// Match values; a `not ` prefix negates a value.
    #[serde(deserialize_with = "string_or_list")]
    pub value: Vec<String>,
}

/// Aggregation spec partitioning collected events into buckets.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationBlock {
    /// Field whose value keys the buckets.
    pub field: String,
}

/// One analysis method, tagged by `method`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AnalysisBlock {
    /// Drop buckets whose field count is outside the inclusive range.
    Threshold {
        /// Field counted per bucket.
        field: String,
        /// Inclusive minimum count.
        #[serde(default)]
        minimum: Option<u64>,
        /// Inclusive maximum count.
        #[serde(default)]
        maximum: Option<u64>,
        /// Count only distinct values.
        #[serde(default)]
        count_unique_only: bool,
    },
    /// Keep only buckets representing a small share of the dataset.
    Outlier {
        /// Largest share (percent) a bucket may hold and still be an outlier.
        maximum_percent: u64,
        /// Average share below which the dataset is considered noise.
        #[serde(default = "default_noisy_percent")]
        noisy_percent: u64,
    },
    /// Keep entries whose field appears only in the first collection.
    FirstCollectionOnly {
        /// Compared field.
        field: String,
    },
    /// Keep entries whose field matches something in the first collection.
    MatchAllToFirstCollection {
        /// Compared field.
        field: String,
        /// Comparison style.
        match_method: FirstCollectionMatch,
    },
}

/// Comparison styles for `match_all_to_first_collection`.
///
/// # Invariants
/// - Variants are stable for rule-file matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstCollectionMatch {
    /// Literal equality.
    Exact,
    /// Substring containment in either direction.
    Contains,
    /// IPv4 CIDR containment of an address in a netblock.
    Subnet,
}

/// Default noise share for the outlier method.
const fn default_noisy_percent() -> u64 {
    10
}

/// Headline template, either bare text or a block form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Headline {
    /// Bare template string.
    Text(String),
    /// Block form with publication options.
    Block {
        /// Template string.
        text: String,
        /// Collections whose entries are attached to the result; all when
        /// absent.
        #[serde(default)]
        publish_collections: Option<Vec<usize>>,
    },
}

impl Headline {
    /// Returns the template text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text)
            | Self::Block {
                text, ..
            } => text,
        }
    }
}

/// Accepts either a single string or a list of strings for method values.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    /// Intermediate shape for the untagged value field.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        /// A single value.
        One(String),
        /// Several values, any of which may match.
        Many(Vec<String>),
    }
    match Raw::deserialize(deserializer)? {
        Raw::One(value) => Ok(vec![value]),
        Raw::Many(values) => Ok(values),
    }
}

// ============================================================================
// SECTION: Validated Rule
// ============================================================================

/// Fields addressable by collect methods and analyses.
const BASE_FIELDS: &[&str] = &["type", "module", "data", "risk"];
/// Graph prefixes usable on methods after the first.
const FIELD_PREFIXES: &[&str] = &["source", "child", "entity"];

/// Returns an error when a field reference is malformed.
fn validate_field(field: &str, allow_prefix: bool) -> Result<(), RuleError> {
    match field.split_once('.') {
        None if BASE_FIELDS.contains(&field) => Ok(()),
        Some((prefix, base))
            if allow_prefix
                && FIELD_PREFIXES.contains(&prefix)
                && BASE_FIELDS.contains(&base) =>
        {
            Ok(())
        }
        _ => Err(RuleError::Field(field.to_string())),
    }
}

/// Validated, loaded correlation rule.
///
/// # Invariants
/// - `descriptor.rule_id` equals the source file stem.
/// - Every regex value compiled during validation.
#[derive(Debug, Clone)]
pub struct CorrelationRule {
    /// Descriptor persisted with produced correlations.
    pub descriptor: RuleDescriptor,
    /// Evaluation scope.
    pub scope: RuleScope,
    /// Ordered collect blocks.
    pub collections: Vec<CollectBlock>,
    /// Optional bucket field.
    pub aggregation: Option<String>,
    /// Ordered analysis methods.
    pub analysis: Vec<AnalysisBlock>,
    /// Headline template.
    pub headline: Headline,
}

impl CorrelationRule {
    /// Parses and validates one rule document.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] for schema violations, id/stem mismatches,
    /// unsupported versions, and invalid regex or field references.
    pub fn parse(stem: &str, raw: &str) -> Result<Self, RuleError> {
        let document: RuleDocument =
            serde_yaml::from_str(raw).map_err(|err| RuleError::Yaml(err.to_string()))?;
        if document.id != stem {
            return Err(RuleError::IdMismatch {
                id: document.id,
                stem: stem.to_string(),
            });
        }
        if document.version != SUPPORTED_VERSION {
            return Err(RuleError::Version(document.version));
        }
        if document.collections.is_empty() {
            return Err(RuleError::EmptyCollections);
        }
        for (index, block) in document.collections.iter().enumerate() {
            if block.collect.is_empty() {
                return Err(RuleError::EmptyCollect(index));
            }
            for (method_index, method) in block.collect.iter().enumerate() {
                validate_field(&method.field, method_index > 0)?;
                if method.method == MatchKind::Regex {
                    for value in &method.value {
                        let pattern = value.strip_prefix("not ").unwrap_or(value);
                        regex::Regex::new(pattern)
                            .map_err(|err| RuleError::Regex(err.to_string()))?;
                    }
                }
            }
        }
        if let Some(aggregation) = &document.aggregation {
            validate_field(&aggregation.field, true)?;
        }
        let analysis = document.analysis.clone().unwrap_or_default();
        for block in &analysis {
            match block {
                AnalysisBlock::Threshold {
                    field, ..
                }
                | AnalysisBlock::FirstCollectionOnly {
                    field,
                }
                | AnalysisBlock::MatchAllToFirstCollection {
                    field, ..
                } => validate_field(field, true)?,
                AnalysisBlock::Outlier {
                    ..
                } => {}
            }
        }
        Ok(Self {
            descriptor: RuleDescriptor {
                rule_id: document.id,
                name: document.meta.name,
                description: document.meta.description,
                risk: document.meta.risk,
                logic: raw.to_string(),
            },
            scope: document.meta.scope,
            collections: document.collections,
            aggregation: document.aggregation.map(|block| block.field),
            analysis,
            headline: document.headline,
        })
    }
}

// ============================================================================
// SECTION: Rule Set
// ============================================================================

/// All rules loaded from a correlations directory.
///
/// # Invariants
/// - Immutable after loading; shared read-only across scans.
#[derive(Debug, Default)]
pub struct RuleSet {
    /// Successfully loaded rules, sorted by id.
    rules: Vec<CorrelationRule>,
    /// Files that failed to load.
    failures: Vec<RuleLoadFailure>,
}

impl RuleSet {
    /// Loads every `.yaml` file under a directory.
    ///
    /// Files that fail to parse are recorded in [`Self::failures`] and
    /// logged; they never prevent other rules from loading.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Io`] only when the directory itself is
    /// unreadable.
    pub fn load_dir(dir: &Path) -> Result<Self, RuleError> {
        let entries = fs::read_dir(dir).map_err(|err| RuleError::Io(err.to_string()))?;
        let mut set = Self::default();
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            })
            .collect();
        paths.sort();
        for path in paths {
            match load_file(&path) {
                Ok(rule) => set.rules.push(rule),
                Err(error) => {
                    tracing::error!(file = %path.display(), error = %error, "rule failed to load");
                    set.failures.push(RuleLoadFailure {
                        path,
                        error,
                    });
                }
            }
        }
        set.rules
            .sort_by(|a, b| a.descriptor.rule_id.cmp(&b.descriptor.rule_id));
        Ok(set)
    }

    /// Builds a set from already-validated rules.
    #[must_use]
    pub fn from_rules(rules: Vec<CorrelationRule>) -> Self {
        Self {
            rules,
            failures: Vec::new(),
        }
    }

    /// Returns the loaded rules.
    #[must_use]
    pub fn rules(&self) -> &[CorrelationRule] {
        &self.rules
    }

    /// Returns the recorded load failures.
    #[must_use]
    pub fn failures(&self) -> &[RuleLoadFailure] {
        &self.failures
    }

    /// Finds a rule by id.
    #[must_use]
    pub fn get(&self, rule_id: &str) -> Option<&CorrelationRule> {
        self.rules.iter().find(|rule| rule.descriptor.rule_id == rule_id)
    }
}

/// Loads and validates one rule file.
fn load_file(path: &Path) -> Result<CorrelationRule, RuleError> {
    let metadata = fs::metadata(path).map_err(|err| RuleError::Io(err.to_string()))?;
    if metadata.len() > MAX_RULE_FILE_SIZE {
        return Err(RuleError::TooLarge {
            max: MAX_RULE_FILE_SIZE,
            actual: metadata.len(),
        });
    }
    let raw = fs::read_to_string(path).map_err(|err| RuleError::Io(err.to_string()))?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| RuleError::Io(format!("bad rule filename: {}", path.display())))?;
    CorrelationRule::parse(stem, &raw)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    /// Minimal valid rule body for the given id.
    fn minimal(id: &str) -> String {
        format!(
            "id: {id}\n\
             version: 1\n\
             meta:\n\
             \x20 name: Test rule\n\
             \x20 description: A test rule\n\
             \x20 risk: LOW\n\
             collections:\n\
             \x20 - collect:\n\
             \x20     - method: exact\n\
             \x20       field: type\n\
             \x20       value: IP_ADDRESS\n\
             headline: \"Found {{data}}\"\n"
        )
    }

    #[test]
    fn minimal_rule_parses() {
        let rule = CorrelationRule::parse("test_rule", &minimal("test_rule")).unwrap();
        assert_eq!(rule.descriptor.rule_id, "test_rule");
        assert_eq!(rule.scope, RuleScope::Scan);
        assert_eq!(rule.headline.text(), "Found {data}");
    }

    #[test]
    fn id_must_match_stem() {
        let err = CorrelationRule::parse("other", &minimal("test_rule")).unwrap_err();
        assert!(matches!(err, RuleError::IdMismatch { .. }));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let raw = format!("{}extra_key: nope\n", minimal("test_rule"));
        let err = CorrelationRule::parse("test_rule", &raw).unwrap_err();
        assert!(matches!(err, RuleError::Yaml(_)));
    }

    #[test]
    fn version_must_be_one() {
        let raw = minimal("test_rule").replace("version: 1", "version: 2");
        let err = CorrelationRule::parse("test_rule", &raw).unwrap_err();
        assert!(matches!(err, RuleError::Version(2)));
    }

    #[test]
    fn bad_regex_is_rejected() {
        let raw = minimal("test_rule")
            .replace("method: exact", "method: regex")
            .replace("value: IP_ADDRESS", "value: \"[unclosed\"");
        let err = CorrelationRule::parse("test_rule", &raw).unwrap_err();
        assert!(matches!(err, RuleError::Regex(_)));
    }

    #[test]
    fn prefixed_field_on_first_method_is_rejected() {
        let raw = minimal("test_rule").replace("field: type", "field: source.type");
        let err = CorrelationRule::parse("test_rule", &raw).unwrap_err();
        assert!(matches!(err, RuleError::Field(_)));
    }
}
