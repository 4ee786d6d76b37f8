//! Deterministic truth rules
//!
//! Checks capability references against the truth corpus, required
//! frontmatter fields and forbidden patterns. Every issue produced here is
//! rule-based with confidence 1.0.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::{ForbiddenPattern, TruthRulesConfig};
use crate::contracts::{category, DocumentContext, Issue, IssueBuilder, Location, Severity};
use crate::corpus::{closest_entry, normalize, TruthCorpus, TruthEntry};
use crate::document::{line_of, snippet_at, string_list, SplitDocument};
use crate::error::{EngineError, Result};

/// Rule id stamped on every rule-based truth issue
pub const RULE_ID: &str = "truth.rules";

const SNIPPET_CHARS: usize = 120;
const SUGGESTION_DISTANCE: usize = 2;

/// Kinds of deterministic truth rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthRule {
    /// Referenced capability must exist in the corpus
    UnknownReference,
    /// Referenced capability must be available in the document's family
    FamilyMismatch,
    /// Referenced capability is deprecated
    Deprecated,
    /// Frontmatter field required by the truth profile
    RequiredField,
    /// Configured text that must not appear
    ForbiddenPattern,
}

impl fmt::Display for TruthRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TruthRule::UnknownReference => write!(f, "unknown_reference"),
            TruthRule::FamilyMismatch => write!(f, "family_mismatch"),
            TruthRule::Deprecated => write!(f, "deprecated"),
            TruthRule::RequiredField => write!(f, "required_field"),
            TruthRule::ForbiddenPattern => write!(f, "forbidden_pattern"),
        }
    }
}

impl TruthRule {
    fn issue(self, code: &str) -> IssueBuilder {
        Issue::builder(RULE_ID, code, category::TRUTH).subcategory(self.to_string())
    }
}

/// A capability mention found in the document
#[derive(Debug, Clone)]
struct Reference {
    name: String,
    offset: Option<usize>,
}

struct CompiledPattern {
    regex: Regex,
    definition: ForbiddenPattern,
}

/// Result of the rule-based phase
#[derive(Debug, Clone, Default)]
pub struct RuleReport {
    pub issues: Vec<Issue>,
    /// Corpus entries the document references, in discovery order
    pub referenced: Vec<TruthEntry>,
    /// Names mentioned that the corpus does not know
    pub unknown: Vec<String>,
    pub references_checked: usize,
}

/// Rule-based truth checker
pub struct RuleBasedChecker {
    corpus: Arc<dyn TruthCorpus>,
    reference_patterns: Vec<Regex>,
    reference_keys: Vec<String>,
    required_frontmatter: Vec<String>,
    forbidden: Vec<CompiledPattern>,
}

impl RuleBasedChecker {
    /// Compile the configured patterns
    pub fn new(config: &TruthRulesConfig, corpus: Arc<dyn TruthCorpus>) -> Result<Self> {
        let mut reference_patterns = Vec::with_capacity(config.reference_patterns.len());
        for pattern in &config.reference_patterns {
            let regex = Regex::new(pattern)?;
            if regex.captures_len() < 2 {
                return Err(EngineError::invalid_config(format!(
                    "reference pattern '{}' has no capture group",
                    pattern
                )));
            }
            reference_patterns.push(regex);
        }

        let forbidden = config
            .forbidden_patterns
            .iter()
            .map(|definition| {
                Ok(CompiledPattern {
                    regex: Regex::new(&definition.pattern)?,
                    definition: definition.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            corpus,
            reference_patterns,
            reference_keys: config.reference_keys.clone(),
            required_frontmatter: config.required_frontmatter.clone(),
            forbidden,
        })
    }

    /// Run every rule against `content`
    ///
    /// `detected` holds corpus ids found by upstream validators; they are
    /// checked like any other reference.
    pub fn check(
        &self,
        content: &str,
        document: &DocumentContext,
        detected: &[String],
    ) -> RuleReport {
        let doc = SplitDocument::parse(content);
        // Broken frontmatter is reported by the frontmatter validator.
        let parsed = doc.mapping();
        let fields_checkable = parsed.is_ok() && !doc.unterminated;
        let mapping = parsed.ok().flatten();

        let mut report = RuleReport::default();
        let references = self.collect_references(content, &doc, mapping.as_ref(), detected);
        report.references_checked = references.len();

        for reference in references {
            match self.corpus.lookup(&reference.name) {
                None => {
                    report.issues.push(self.unknown_reference(content, &reference));
                    report.unknown.push(reference.name);
                }
                Some(entry) => {
                    report
                        .issues
                        .extend(self.entry_issues(content, &reference, &entry, document));
                    report.referenced.push(entry);
                }
            }
        }

        if fields_checkable {
            for key in &self.required_frontmatter {
                let present = mapping.as_ref().is_some_and(|m| m.get(key.as_str()).is_some());
                if !present {
                    report.issues.push(
                        TruthRule::RequiredField
                            .issue("TRUTH_REQUIRED_FIELD")
                            .level(Severity::Error)
                            .location(Location::line(1).with_section(key.clone()))
                            .build(format!("Required frontmatter field '{}' is missing", key)),
                    );
                }
            }
        }

        for pattern in &self.forbidden {
            for m in pattern.regex.find_iter(doc.body) {
                let offset = doc.body_offset + m.start();
                let mut builder = TruthRule::ForbiddenPattern
                    .issue(&pattern.definition.code)
                    .level(pattern.definition.level)
                    .location(Location::line(line_of(content, offset)))
                    .context_snippet(snippet_at(content, offset, SNIPPET_CHARS));
                if let Some(suggestion) = &pattern.definition.suggestion {
                    builder = builder.suggestion(suggestion.clone());
                }
                report.issues.push(builder.build(pattern.definition.message.clone()));
            }
        }

        report
    }

    fn collect_references(
        &self,
        content: &str,
        doc: &SplitDocument<'_>,
        mapping: Option<&serde_yaml::Mapping>,
        detected: &[String],
    ) -> Vec<Reference> {
        let mut seen = HashSet::new();
        let mut references = Vec::new();
        let mut add = |name: &str, offset: Option<usize>| {
            let name = name.trim();
            if !name.is_empty() && seen.insert(normalize(name)) {
                references.push(Reference {
                    name: name.to_string(),
                    offset,
                });
            }
        };

        if let (Some(mapping), Some(raw)) = (mapping, doc.frontmatter) {
            // Frontmatter starts on the line after the opening delimiter.
            let fm_offset = content.find('\n').map_or(0, |i| i + 1);
            for key in &self.reference_keys {
                for name in string_list(mapping, key) {
                    let offset = raw.find(name.as_str()).map(|o| fm_offset + o);
                    add(&name, offset);
                }
            }
        }

        for regex in &self.reference_patterns {
            for caps in regex.captures_iter(doc.body) {
                let Some(m) = caps.name("id").or_else(|| caps.get(1)) else {
                    continue;
                };
                add(m.as_str(), Some(doc.body_offset + m.start()));
            }
        }

        for id in detected {
            add(id, None);
        }

        references
    }

    fn locate(content: &str, builder: IssueBuilder, offset: Option<usize>) -> IssueBuilder {
        match offset {
            Some(offset) => builder
                .location(Location::line(line_of(content, offset)))
                .context_snippet(snippet_at(content, offset, SNIPPET_CHARS)),
            None => builder,
        }
    }

    fn unknown_reference(&self, content: &str, reference: &Reference) -> Issue {
        let mut builder = TruthRule::UnknownReference
            .issue("TRUTH_UNKNOWN_REFERENCE")
            .level(Severity::Error);
        if let Some(entry) = closest_entry(self.corpus.as_ref(), &reference.name, SUGGESTION_DISTANCE) {
            builder = builder.suggestion(format!("Did you mean '{}'?", entry.id));
        }
        Self::locate(content, builder, reference.offset).build(format!(
            "Referenced capability '{}' is not in the truth corpus",
            reference.name
        ))
    }

    fn entry_issues(
        &self,
        content: &str,
        reference: &Reference,
        entry: &TruthEntry,
        document: &DocumentContext,
    ) -> Vec<Issue> {
        let mut issues = Vec::new();

        if !entry.available_in(&document.family) {
            let builder = TruthRule::FamilyMismatch
                .issue("TRUTH_FAMILY_MISMATCH")
                .level(Severity::Error)
                .suggestion(format!("Available in: {}", entry.families.join(", ")));
            issues.push(Self::locate(content, builder, reference.offset).build(format!(
                "Capability '{}' is not available in family '{}'",
                entry.id, document.family
            )));
        }

        if entry.deprecated {
            let mut builder = TruthRule::Deprecated
                .issue("TRUTH_DEPRECATED")
                .level(Severity::Warning);
            if let Some(replacement) = &entry.replacement {
                builder = builder.suggestion(format!("Use '{}' instead", replacement));
            }
            issues.push(
                Self::locate(content, builder, reference.offset)
                    .build(format!("Capability '{}' is deprecated", entry.id)),
            );
        }

        issues
    }
}
