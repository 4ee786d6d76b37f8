//! Validation Contract Definitions
//!
//! This module defines the data model shared by every validator and by the
//! tiered scheduler:
//!
//! - [`Issue`]: one immutable finding with severity, location and provenance
//! - [`Outcome`]: one validator's result on one document
//! - [`ValidationResult`]: the engine-level aggregate returned by `execute`
//! - [`DocumentContext`]: read-only facts about the document being validated
//!
//! # Design Principles
//!
//! - **Immutable**: issues and outcomes are produced once and never mutated
//! - **Deterministic**: issue ids are derived from issue content, so identical
//!   inputs yield byte-identical issues
//! - **Traceable**: every issue records which rule produced it and whether it
//!   came from a deterministic rule or a probabilistic semantic pass

pub mod semantic;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub use semantic::{SemanticFinding, SemanticPrompt, SemanticResponse};

/// Well-known issue categories
pub mod category {
    /// Findings from truth validation (corpus lookup, forbidden patterns, required fields)
    pub const TRUTH: &str = "truth";
    /// Frontmatter structure findings
    pub const FRONTMATTER: &str = "frontmatter";
    /// Capability names that only approximately match the corpus
    pub const FUZZY: &str = "fuzzy";
    /// Synthetic findings raised when a validator itself fails
    pub const VALIDATOR_INTERNAL: &str = "validator_internal";
}

/// Severity level for issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - no action required
    Info,
    /// Warning - should be addressed but not blocking
    Warning,
    /// Error - must be fixed before publishing
    Error,
    /// Critical - publishing would mislead readers
    Critical,
}

impl Severity {
    /// Default numeric severity score (0-100) for this level
    pub fn default_score(&self) -> u8 {
        match self {
            Severity::Info => 10,
            Severity::Warning => 40,
            Severity::Error => 70,
            Severity::Critical => 90,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Error
    }
}

/// Where an issue came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Deterministic rule or lookup
    RuleBased,
    /// Model-backed semantic enhancement
    LlmSemantic,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::RuleBased => "rule_based",
            Provenance::LlmSemantic => "llm_semantic",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of an issue inside the document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// 1-based line number
    pub line: usize,
    /// 1-based column, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    /// Enclosing section (frontmatter key or heading), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Location {
    pub fn line(line: usize) -> Self {
        Self {
            line,
            column: None,
            section: None,
        }
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(col) => write!(f, "{}:{}", self.line, col),
            None => write!(f, "{}", self.line),
        }
    }
}

/// A single validation finding
///
/// Issues are built through [`IssueBuilder`] and never mutated afterwards.
/// The `id` is a content hash, so the same finding on the same document
/// always carries the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable content-derived identifier
    pub id: String,
    /// Machine-readable code (e.g. "TRUTH_UNKNOWN_REFERENCE")
    pub code: String,
    /// Severity level
    pub level: Severity,
    /// Numeric severity score (0-100)
    pub severity_score: u8,
    /// Location in the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Issue category (see [`category`])
    pub category: String,
    /// Optional finer-grained category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Suggested remediation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Example of the fixed text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_example: Option<String>,
    /// Snippet of the offending content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_snippet: Option<String>,
    /// Rule-based or semantic
    pub provenance: Provenance,
    /// Confidence in this finding (0.0-1.0)
    pub confidence: f64,
    /// Identifier of the rule that produced this issue
    pub rule_id: String,
}

impl Issue {
    /// Start building a rule-based issue
    pub fn builder(
        rule_id: impl Into<String>,
        code: impl Into<String>,
        category: impl Into<String>,
    ) -> IssueBuilder {
        IssueBuilder::new(rule_id, code, category)
    }

    /// Check if this is a blocking issue (error or critical)
    pub fn is_blocking(&self) -> bool {
        matches!(self.level, Severity::Error | Severity::Critical)
    }

    pub fn is_rule_based(&self) -> bool {
        self.provenance == Provenance::RuleBased
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(
                f,
                "[{}] {} at {}: {}",
                self.level, self.code, loc, self.message
            ),
            None => write!(f, "[{}] {}: {}", self.level, self.code, self.message),
        }
    }
}

/// Builder for [`Issue`] instances
#[derive(Debug, Clone)]
pub struct IssueBuilder {
    rule_id: String,
    code: String,
    category: String,
    subcategory: Option<String>,
    level: Severity,
    severity_score: Option<u8>,
    location: Option<Location>,
    suggestion: Option<String>,
    fix_example: Option<String>,
    context_snippet: Option<String>,
    provenance: Provenance,
    confidence: f64,
}

impl IssueBuilder {
    pub fn new(
        rule_id: impl Into<String>,
        code: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            code: code.into(),
            category: category.into(),
            subcategory: None,
            level: Severity::Error,
            severity_score: None,
            location: None,
            suggestion: None,
            fix_example: None,
            context_snippet: None,
            provenance: Provenance::RuleBased,
            confidence: 1.0,
        }
    }

    pub fn level(mut self, level: Severity) -> Self {
        self.level = level;
        self
    }

    /// Override the numeric score derived from the level
    pub fn severity_score(mut self, score: u8) -> Self {
        self.severity_score = Some(score.min(100));
        self
    }

    pub fn subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn fix_example(mut self, example: impl Into<String>) -> Self {
        self.fix_example = Some(example.into());
        self
    }

    pub fn context_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.context_snippet = Some(snippet.into());
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Set the confidence, clamped to [0, 1]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    /// Build the issue with a message
    pub fn build(self, message: impl Into<String>) -> Issue {
        let message = message.into();
        let id = issue_id(
            &self.rule_id,
            &self.code,
            &self.category,
            &message,
            self.location.as_ref(),
            self.provenance,
        );

        Issue {
            id,
            code: self.code,
            level: self.level,
            severity_score: self.severity_score.unwrap_or_else(|| self.level.default_score()),
            location: self.location,
            category: self.category,
            subcategory: self.subcategory,
            message,
            suggestion: self.suggestion,
            fix_example: self.fix_example,
            context_snippet: self.context_snippet,
            provenance: self.provenance,
            confidence: self.confidence,
            rule_id: self.rule_id,
        }
    }
}

fn issue_id(
    rule_id: &str,
    code: &str,
    category: &str,
    message: &str,
    location: Option<&Location>,
    provenance: Provenance,
) -> String {
    let mut hasher = Sha256::new();
    for part in [rule_id, code, category, message, provenance.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    if let Some(loc) = location {
        hasher.update(loc.line.to_le_bytes());
        hasher.update(loc.column.unwrap_or(0).to_le_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("iss_{}", &digest[..16])
}

/// Read-only facts about the document being validated
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentContext {
    /// Path of the source file
    pub file_path: String,
    /// Product family the document belongs to
    pub family: String,
    /// Validation profile (e.g. "strict", "default")
    pub profile: String,
}

impl DocumentContext {
    pub fn new(
        file_path: impl Into<String>,
        family: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            family: family.into(),
            profile: profile.into(),
        }
    }
}

/// One validator's result on one document
///
/// Metrics use a `BTreeMap` so serialised outcomes are byte-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub issues: Vec<Issue>,
    /// Scalar confidence (0.0-1.0)
    pub confidence: f64,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl Outcome {
    pub fn new(issues: Vec<Issue>, confidence: f64) -> Self {
        Self {
            issues,
            confidence,
            metrics: BTreeMap::new(),
        }
    }

    /// An outcome with no issues and full confidence
    pub fn clean() -> Self {
        Self::new(Vec::new(), 1.0)
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Metric set on outcomes that must not be stored in the outcome cache
    pub const UNCACHEABLE_METRIC: &'static str = "uncacheable";

    /// Mark the outcome as reflecting a transient condition
    pub fn uncacheable(self) -> Self {
        self.with_metric(Self::UNCACHEABLE_METRIC, serde_json::Value::Bool(true))
    }

    pub fn is_cacheable(&self) -> bool {
        !matches!(
            self.metrics.get(Self::UNCACHEABLE_METRIC),
            Some(serde_json::Value::Bool(true))
        )
    }

    /// Check the outcome is well formed: confidences are finite and in [0, 1]
    pub fn check_well_formed(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "outcome confidence {} is outside [0, 1]",
                self.confidence
            ));
        }
        if let Some(issue) = self
            .issues
            .iter()
            .find(|i| !(0.0..=1.0).contains(&i.confidence))
        {
            return Err(format!(
                "issue '{}' has confidence {} outside [0, 1]",
                issue.code, issue.confidence
            ));
        }
        Ok(())
    }

    pub fn count_at(&self, level: Severity) -> usize {
        self.issues.iter().filter(|i| i.level == level).count()
    }
}

/// Engine-level aggregate of one `execute` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Request identifier (not part of the deterministic payload)
    pub request_id: Uuid,
    /// All issues in tier order, then declaration order, then validator order
    pub issues: Vec<Issue>,
    /// Minimum confidence across contributing validators
    pub confidence: f64,
    /// Whether the run stopped before the final tier
    pub early_terminated: bool,
    /// Name of the tier after which the run stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_after: Option<String>,
    /// Validators that contributed an outcome, in aggregation order
    pub validators: Vec<String>,
    /// Aggregate metrics
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl ValidationResult {
    /// The result of a request that selected no validators
    pub fn empty() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            issues: Vec::new(),
            confidence: 1.0,
            early_terminated: false,
            terminated_after: None,
            validators: Vec::new(),
            metrics: BTreeMap::new(),
            duration_ms: 0,
        }
    }

    /// Whether no blocking issue was found
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(Issue::is_blocking)
    }

    pub fn count_at(&self, level: Severity) -> usize {
        self.issues.iter().filter(|i| i.level == level).count()
    }
}
