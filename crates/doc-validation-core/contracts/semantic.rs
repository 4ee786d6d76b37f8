//! Semantic enhancement contracts
//!
//! Request and response payloads exchanged with the model-backed semantic
//! enhancer. Prompts are serialised deterministically so their hash can key
//! the response cache.

use serde::{Deserialize, Serialize};

use super::{Issue, Location, Provenance, Severity};

/// Prompt sent to the semantic enhancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticPrompt {
    /// Product family of the document
    pub family: String,
    /// Validation profile
    pub profile: String,
    /// Document body under review
    pub content: String,
    /// Truth corpus entries relevant to the document, as `id: description`
    pub truth_context: Vec<String>,
    /// Capability ids the rule-based phase already resolved
    pub referenced_ids: Vec<String>,
}

impl SemanticPrompt {
    /// Canonical serialisation used for cache keys
    pub fn canonical_json(&self) -> String {
        // Field order is fixed by the struct definition.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One finding reported by the semantic enhancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticFinding {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub message: String,
    #[serde(default = "default_level")]
    pub level: Severity,
    pub confidence: f64,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

fn default_level() -> Severity {
    Severity::Warning
}

impl SemanticFinding {
    /// Convert into an issue tagged `llm_semantic`
    pub fn into_issue(self, rule_id: &str) -> Issue {
        let code = format!("SEMANTIC_{}", self.category.to_uppercase());
        let mut builder = Issue::builder(rule_id, code, self.category)
            .level(self.level)
            .provenance(Provenance::LlmSemantic)
            .confidence(self.confidence);
        if let Some(sub) = self.subcategory {
            builder = builder.subcategory(sub);
        }
        if let Some(line) = self.line {
            builder = builder.location(Location::line(line));
        }
        if let Some(suggestion) = self.suggestion {
            builder = builder.suggestion(suggestion);
        }
        builder.build(self.message)
    }
}

/// Response returned by the semantic enhancer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticResponse {
    #[serde(default)]
    pub findings: Vec<SemanticFinding>,
    /// Model identifier reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
