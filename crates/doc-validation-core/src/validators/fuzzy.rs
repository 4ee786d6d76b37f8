//! Fuzzy capability-name detection
//!
//! Scans the document body for names that match corpus entries after
//! normalisation. Detected ids are published in the outcome's
//! `detected_ids` metric so downstream validators (truth) can check them.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::{ValidationContext, Validator};
use crate::contracts::{category, Issue, Location, Outcome, Severity};
use crate::corpus::{edit_distance, normalize, TruthCorpus, TruthEntry};
use crate::document::{line_of, snippet_at, SplitDocument};
use crate::error::ValidatorError;

pub const VALIDATOR_ID: &str = "fuzzy";

/// Metric key holding the sorted list of detected corpus ids
pub const DETECTED_IDS_METRIC: &str = "detected_ids";

const MAX_NGRAM: usize = 3;
const MIN_NEAR_MISS_LEN: usize = 6;
const NEAR_MISS_CONFIDENCE: f64 = 0.8;

/// Detects corpus names written loosely or slightly misspelled
pub struct FuzzyMatchValidator {
    corpus: Arc<dyn TruthCorpus>,
}

#[derive(Debug)]
struct Token<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

impl FuzzyMatchValidator {
    pub fn new(corpus: Arc<dyn TruthCorpus>) -> Self {
        Self { corpus }
    }

    fn scan(&self, content: &str) -> (Vec<Issue>, BTreeSet<String>) {
        let doc = SplitDocument::parse(content);
        let tokens = tokenize(content, doc.body_offset);

        let entries = self.corpus.entries();
        let mut names: HashMap<String, &TruthEntry> = HashMap::new();
        for entry in &entries {
            for name in entry.names() {
                names.entry(normalize(name)).or_insert(entry);
            }
        }

        let mut issues = Vec::new();
        let mut detected = BTreeSet::new();
        let mut reported = BTreeSet::new();
        let mut i = 0;

        while i < tokens.len() {
            let matched = (1..=MAX_NGRAM.min(tokens.len() - i)).rev().find_map(|n| {
                let window = &tokens[i..i + n];
                // An n-gram must be contiguous words on a single line.
                if window.windows(2).any(|w| {
                    let gap = &content[w[0].end..w[1].start];
                    gap.contains('\n') || !gap.trim().is_empty()
                }) {
                    return None;
                }
                let surface = &content[window[0].start..window[n - 1].end];
                names
                    .get(&normalize(surface))
                    .map(|entry| (n, surface, window[0].start, *entry))
            });

            if let Some((n, surface, offset, entry)) = matched {
                detected.insert(entry.id.clone());
                let canonical = surface == entry.id || surface == entry.name;
                if !canonical && reported.insert(surface.to_string()) {
                    issues.push(
                        Issue::builder(VALIDATOR_ID, "FUZZY_NONCANONICAL", category::FUZZY)
                            .level(Severity::Info)
                            .subcategory("noncanonical_name")
                            .location(Location::line(line_of(content, offset)))
                            .context_snippet(snippet_at(content, offset, 120))
                            .suggestion(format!("Write '{}' as '{}'", surface, entry.name))
                            .build(format!(
                                "'{}' refers to capability '{}' by a non-canonical name",
                                surface, entry.id
                            )),
                    );
                }
                i += n;
                continue;
            }

            let token = &tokens[i];
            if let Some(entry) = near_miss(token.text, &names) {
                if reported.insert(token.text.to_string()) {
                    issues.push(
                        Issue::builder(VALIDATOR_ID, "FUZZY_NEAR_MISS", category::FUZZY)
                            .level(Severity::Warning)
                            .subcategory("near_miss")
                            .confidence(NEAR_MISS_CONFIDENCE)
                            .location(Location::line(line_of(content, token.start)))
                            .context_snippet(snippet_at(content, token.start, 120))
                            .suggestion(format!("Did you mean '{}'?", entry.id))
                            .build(format!(
                                "'{}' looks like a misspelling of capability '{}'",
                                token.text, entry.id
                            )),
                    );
                }
            }
            i += 1;
        }

        (issues, detected)
    }
}

/// Words of `content[from..]`, allowing inner `_`, `-` and `.`
fn tokenize(content: &str, from: usize) -> Vec<Token<'_>> {
    let is_word = |c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.');
    let mut tokens = Vec::new();
    let mut start = None;

    for (i, c) in content[from..].char_indices() {
        let i = from + i;
        match (start, is_word(c)) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                push_token(content, s, i, &mut tokens);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        push_token(content, s, content.len(), &mut tokens);
    }
    tokens
}

fn push_token<'a>(content: &'a str, start: usize, end: usize, tokens: &mut Vec<Token<'a>>) {
    let raw = &content[start..end];
    let trimmed = raw.trim_start_matches(|c: char| !c.is_alphanumeric());
    let lead = raw.len() - trimmed.len();
    let trimmed = trimmed.trim_end_matches(|c: char| !c.is_alphanumeric());
    if trimmed.is_empty() {
        return;
    }
    tokens.push(Token {
        text: trimmed,
        start: start + lead,
        end: start + lead + trimmed.len(),
    });
}

/// Identifier-like tokens one edit away from a corpus name
fn near_miss<'a>(token: &str, names: &HashMap<String, &'a TruthEntry>) -> Option<&'a TruthEntry> {
    if !token.contains(['-', '_', '.']) {
        return None;
    }
    let key = normalize(token);
    if key.len() < MIN_NEAR_MISS_LEN {
        return None;
    }
    let mut candidates: Vec<(&String, &&TruthEntry)> = names
        .iter()
        .filter(|(name, _)| name.len().abs_diff(key.len()) <= 1 && edit_distance(&key, name) == 1)
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(b.0));
    candidates.first().map(|(_, entry)| **entry)
}

#[async_trait]
impl Validator for FuzzyMatchValidator {
    fn id(&self) -> &str {
        VALIDATOR_ID
    }

    fn description(&self) -> &str {
        "Loose and misspelled capability names"
    }

    async fn validate(
        &self,
        content: &str,
        _context: &ValidationContext,
    ) -> Result<Outcome, ValidatorError> {
        let (issues, detected) = self.scan(content);
        let near_misses = issues.iter().filter(|i| i.code == "FUZZY_NEAR_MISS").count();
        let confidence = if near_misses > 0 { 0.9 } else { 1.0 };

        Ok(Outcome::new(issues, confidence)
            .with_metric(DETECTED_IDS_METRIC, serde_json::json!(detected))
            .with_metric("near_misses", serde_json::json!(near_misses)))
    }
}

/// Read detected ids published by this validator in an upstream outcome
pub fn detected_ids(outcome: &Outcome) -> Vec<String> {
    outcome
        .metrics
        .get(DETECTED_IDS_METRIC)
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
