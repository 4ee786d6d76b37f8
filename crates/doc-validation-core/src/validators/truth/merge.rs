//! Merge of rule-based and semantic findings
//!
//! Issues are deduplicated by signature: lowercased category plus a prefix of
//! the whitespace-normalised, lowercased message. Rule-based issues are never
//! dropped. A semantic issue is dropped when a rule-based issue or an earlier
//! semantic issue already carries its signature. On collision the
//! rule-based copy is kept exactly as produced; it does not absorb the
//! semantic confidence.

use std::collections::HashSet;

use crate::config::{MergeConfig, SeverityWeights};
use crate::contracts::Issue;

/// Deduplication key of an issue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub category: String,
    pub message_prefix: String,
}

/// Result of merging the two phases
#[derive(Debug, Clone, Default)]
pub struct MergedIssues {
    pub issues: Vec<Issue>,
    /// Semantic issues dropped because a rule-based issue had their signature
    pub collisions: usize,
    /// Semantic issues dropped as duplicates of other semantic issues
    pub duplicates: usize,
}

/// Deduplicates and scores truth findings
#[derive(Debug, Clone)]
pub struct IssueMerger {
    prefix_len: usize,
    weights: SeverityWeights,
}

impl Default for IssueMerger {
    fn default() -> Self {
        Self::new(&MergeConfig::default())
    }
}

impl IssueMerger {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            prefix_len: config.message_prefix_len,
            weights: config.severity_weights,
        }
    }

    pub fn signature(&self, issue: &Issue) -> Signature {
        let normalized = issue
            .message
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        Signature {
            category: issue.category.to_lowercase(),
            message_prefix: normalized.chars().take(self.prefix_len).collect(),
        }
    }

    /// Rule-based issues first in their original order, then the surviving
    /// semantic issues in theirs
    pub fn merge(&self, rule_based: Vec<Issue>, semantic: Vec<Issue>) -> MergedIssues {
        let rule_signatures: HashSet<Signature> =
            rule_based.iter().map(|i| self.signature(i)).collect();
        let mut semantic_signatures = HashSet::new();

        let mut merged = MergedIssues {
            issues: rule_based,
            ..MergedIssues::default()
        };

        for issue in semantic {
            let signature = self.signature(&issue);
            if rule_signatures.contains(&signature) {
                merged.collisions += 1;
            } else if !semantic_signatures.insert(signature) {
                merged.duplicates += 1;
            } else {
                merged.issues.push(issue);
            }
        }

        merged
    }

    /// `1 - max(weight(level) * confidence)` clamped to [0, 1]; 1.0 when empty
    pub fn confidence(&self, issues: &[Issue]) -> f64 {
        let worst = issues
            .iter()
            .map(|i| self.weights.weight(i.level) * i.confidence)
            .fold(0.0_f64, f64::max);
        (1.0 - worst).clamp(0.0, 1.0)
    }
}
