//! Truth corpus
//!
//! The reference facts documentation is checked against: capability
//! identifiers, their aliases, the product families they belong to and
//! deprecation status. The corpus is reloaded independently of requests;
//! callers must tell the scheduler after a reload so cached outcomes that
//! were computed against the old facts are dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{EngineError, Result};

/// One capability in the truth corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthEntry {
    /// Canonical identifier (matched case-insensitively)
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Families the capability is available in; empty means all
    #[serde(default)]
    pub families: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    /// Identifier of the capability replacing a deprecated one
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl TruthEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: Vec::new(),
            families: Vec::new(),
            deprecated: false,
            replacement: None,
            description: String::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.families.push(family.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn deprecated_by(mut self, replacement: impl Into<String>) -> Self {
        self.deprecated = true;
        self.replacement = Some(replacement.into());
        self
    }

    /// Whether the capability is available in `family`
    pub fn available_in(&self, family: &str) -> bool {
        family.is_empty()
            || self.families.is_empty()
            || self.families.iter().any(|f| f.eq_ignore_ascii_case(family))
    }

    /// All names this entry can be referred to by
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str())
            .chain(std::iter::once(self.name.as_str()))
            .chain(self.aliases.iter().map(String::as_str))
    }

    /// One-line summary used in semantic prompts
    pub fn summary(&self) -> String {
        if self.description.is_empty() {
            format!("{}: {}", self.id, self.name)
        } else {
            format!("{}: {}", self.id, self.description)
        }
    }
}

/// Read access to the truth corpus
pub trait TruthCorpus: Send + Sync {
    /// Find an entry by id, name or alias
    fn lookup(&self, id: &str) -> Option<TruthEntry>;

    /// Entries relevant to a free-text query, best first
    fn search(&self, query: &str, limit: usize) -> Vec<TruthEntry>;

    /// Every entry, ordered by id
    fn entries(&self) -> Vec<TruthEntry>;
}

/// Optional retrieval collaborator feeding the semantic enhancer
#[async_trait]
pub trait TruthRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<TruthEntry>;
}

#[derive(Debug, Default)]
struct CorpusIndex {
    entries: Vec<TruthEntry>,
    by_name: HashMap<String, usize>,
}

impl CorpusIndex {
    fn build(mut entries: Vec<TruthEntry>) -> Self {
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        let mut by_name = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            for name in entry.names() {
                by_name.entry(normalize(name)).or_insert(idx);
            }
        }
        Self { entries, by_name }
    }
}

/// Levenshtein distance between two strings
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// The corpus entry whose normalised id or name is closest to `name`,
/// if it is within `max_distance` edits
pub fn closest_entry(
    corpus: &dyn TruthCorpus,
    name: &str,
    max_distance: usize,
) -> Option<TruthEntry> {
    let target = normalize(name);
    if target.is_empty() {
        return None;
    }
    corpus
        .entries()
        .into_iter()
        .filter_map(|entry| {
            let best = entry
                .names()
                .map(|n| edit_distance(&target, &normalize(n)))
                .min()?;
            (best <= max_distance).then_some((best, entry))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, entry)| entry)
}

/// Normalised lookup key: lowercase with `_`, `-`, `.` and spaces removed
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | '.' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// In-memory corpus with an atomically replaceable index
#[derive(Debug, Default)]
pub struct InMemoryTruthCorpus {
    index: RwLock<Arc<CorpusIndex>>,
}

impl InMemoryTruthCorpus {
    pub fn new(entries: Vec<TruthEntry>) -> Self {
        Self {
            index: RwLock::new(Arc::new(CorpusIndex::build(entries))),
        }
    }

    /// Load entries from a JSON or YAML file containing a list of entries
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Self::read_entries(path.as_ref())?))
    }

    fn read_entries(path: &Path) -> Result<Vec<TruthEntry>> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            other => Err(EngineError::ConfigLoad(format!(
                "unsupported corpus format {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Replace the corpus contents
    pub fn reload(&self, entries: Vec<TruthEntry>) {
        let index = Arc::new(CorpusIndex::build(entries));
        let count = index.entries.len();
        match self.index.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
        tracing::info!(entries = count, "Truth corpus reloaded");
    }

    /// Replace the corpus contents from a file
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let entries = Self::read_entries(path.as_ref())?;
        self.reload(entries);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<CorpusIndex> {
        match self.index.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }
}

impl TruthCorpus for InMemoryTruthCorpus {
    fn lookup(&self, id: &str) -> Option<TruthEntry> {
        let index = self.snapshot();
        index
            .by_name
            .get(&normalize(id))
            .and_then(|idx| index.entries.get(*idx))
            .cloned()
    }

    fn search(&self, query: &str, limit: usize) -> Vec<TruthEntry> {
        let index = self.snapshot();
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, &TruthEntry)> = index
            .entries
            .iter()
            .filter_map(|entry| {
                let haystack = format!(
                    "{} {} {} {}",
                    entry.id,
                    entry.name,
                    entry.aliases.join(" "),
                    entry.description
                )
                .to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score > 0).then_some((score, entry))
            })
            .collect();

        // Entries are already id-ordered, so a stable sort keeps ties deterministic.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    fn entries(&self) -> Vec<TruthEntry> {
        self.snapshot().entries.clone()
    }
}
