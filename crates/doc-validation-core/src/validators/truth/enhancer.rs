//! Optional semantic enhancement phase
//!
//! Runs only when enabled, a backend is configured and the content length
//! falls inside the configured window. Every failure mode (disabled, out of
//! window, timeout, service error) yields an empty list plus a skip reason;
//! none of them fails the truth validator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::rules::RuleReport;
use crate::cache::{PromptKey, ValidationCache};
use crate::client::SemanticBackend;
use crate::config::SemanticConfig;
use crate::contracts::{DocumentContext, Issue, SemanticPrompt, SemanticResponse};
use crate::corpus::{TruthCorpus, TruthEntry, TruthRetriever};
use crate::document::SplitDocument;
use crate::error::EnhancerError;

/// Rule id stamped on semantic issues
pub const RULE_ID: &str = "truth.semantic";

const QUERY_CHARS: usize = 2_000;

/// Why the semantic phase produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NoBackend,
    ContentTooShort,
    ContentTooLong,
    Timeout,
    ServiceError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::NoBackend => "no_backend",
            SkipReason::ContentTooShort => "content_too_short",
            SkipReason::ContentTooLong => "content_too_long",
            SkipReason::Timeout => "timeout",
            SkipReason::ServiceError => "service_error",
        }
    }

    /// The skip came from a condition that may not hold on the next run
    pub fn is_transient(&self) -> bool {
        matches!(self, SkipReason::Timeout | SkipReason::ServiceError)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the semantic phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticStatus {
    Applied {
        /// Response came from the response cache
        cached: bool,
        /// Findings returned by the backend
        received: usize,
        /// Findings at or above the confidence threshold
        kept: usize,
    },
    Skipped(SkipReason),
}

impl SemanticStatus {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            SemanticStatus::Skipped(reason) => Some(*reason),
            SemanticStatus::Applied { .. } => None,
        }
    }
}

/// Output of the semantic phase
#[derive(Debug, Clone)]
pub struct SemanticReport {
    pub issues: Vec<Issue>,
    pub status: SemanticStatus,
}

impl SemanticReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            issues: Vec::new(),
            status: SemanticStatus::Skipped(reason),
        }
    }
}

/// Model-backed second opinion on truth claims
pub struct SemanticEnhancer {
    config: SemanticConfig,
    corpus: Arc<dyn TruthCorpus>,
    cache: Arc<ValidationCache>,
    backend: Option<Arc<dyn SemanticBackend>>,
    retriever: Option<Arc<dyn TruthRetriever>>,
}

impl SemanticEnhancer {
    pub fn new(config: SemanticConfig, corpus: Arc<dyn TruthCorpus>, cache: Arc<ValidationCache>) -> Self {
        Self {
            config,
            corpus,
            cache,
            backend: None,
            retriever: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn SemanticBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use `retriever` instead of corpus search to pick prompt context
    pub fn with_retriever(mut self, retriever: Arc<dyn TruthRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    /// Time available to the phase: the configured timeout, shortened to
    /// leave `timeout_reserve` before the call deadline
    pub fn budget(&self, remaining: Option<Duration>) -> Duration {
        let configured = self.config.timeout();
        match remaining {
            Some(remaining) => configured.min(remaining.saturating_sub(self.config.timeout_reserve())),
            None => configured,
        }
    }

    /// Run the phase; `remaining` is the time left before the call deadline
    pub async fn enhance(
        &self,
        content: &str,
        document: &DocumentContext,
        rules: &RuleReport,
        remaining: Option<Duration>,
    ) -> SemanticReport {
        if !self.config.enabled {
            return SemanticReport::skipped(SkipReason::Disabled);
        }
        let Some(backend) = self.backend.as_ref() else {
            return SemanticReport::skipped(SkipReason::NoBackend);
        };
        if content.len() < self.config.min_content_len {
            return SemanticReport::skipped(SkipReason::ContentTooShort);
        }
        if content.len() > self.config.max_content_len {
            return SemanticReport::skipped(SkipReason::ContentTooLong);
        }

        let budget = self.budget(remaining);
        if budget.is_zero() {
            return SemanticReport::skipped(SkipReason::Timeout);
        }

        let call = self.call(backend.as_ref(), content, document, rules, budget);
        let (response, cached) = match tokio::time::timeout(budget, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(EnhancerError::Timeout(_))) | Err(_) => {
                tracing::info!(
                    file = %document.file_path,
                    budget_ms = budget.as_millis() as u64,
                    "Semantic enhancement timed out; continuing with rule-based findings"
                );
                return SemanticReport::skipped(SkipReason::Timeout);
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    file = %document.file_path,
                    error = %e,
                    "Semantic enhancement failed; continuing with rule-based findings"
                );
                return SemanticReport::skipped(SkipReason::ServiceError);
            }
        };

        let received = response.findings.len();
        let issues: Vec<Issue> = response
            .findings
            .into_iter()
            .filter(|f| f.confidence.is_finite() && f.confidence >= self.config.confidence_threshold)
            .map(|f| f.into_issue(RULE_ID))
            .collect();

        tracing::debug!(
            file = %document.file_path,
            cached,
            received,
            kept = issues.len(),
            "Semantic enhancement applied"
        );

        SemanticReport {
            status: SemanticStatus::Applied {
                cached,
                received,
                kept: issues.len(),
            },
            issues,
        }
    }

    async fn call(
        &self,
        backend: &dyn SemanticBackend,
        content: &str,
        document: &DocumentContext,
        rules: &RuleReport,
        budget: Duration,
    ) -> Result<(SemanticResponse, bool), EnhancerError> {
        let prompt = self.prompt(content, document, rules).await;
        let key = PromptKey::from_prompt(&prompt);

        if let Some(response) = self.cache.get_response(&key).await {
            return Ok((response, true));
        }

        let response = backend.enhance(&prompt, budget).await?;
        self.cache.set_response(&key, response.clone()).await;
        Ok((response, false))
    }

    async fn prompt(
        &self,
        content: &str,
        document: &DocumentContext,
        rules: &RuleReport,
    ) -> SemanticPrompt {
        let body = SplitDocument::parse(content).body;
        let query: String = body.chars().take(QUERY_CHARS).collect();

        let retrieved = match &self.retriever {
            Some(retriever) => retriever.retrieve(&query, self.config.context_top_k).await,
            None => self.corpus.search(&query, self.config.context_top_k),
        };

        let mut seen = BTreeSet::new();
        let truth_context = rules
            .referenced
            .iter()
            .chain(retrieved.iter())
            .filter(|entry| seen.insert(entry.id.clone()))
            .map(TruthEntry::summary)
            .collect();

        SemanticPrompt {
            family: document.family.clone(),
            profile: document.profile.clone(),
            content: body.to_string(),
            truth_context,
            referenced_ids: rules.referenced.iter().map(|e| e.id.clone()).collect(),
        }
    }
}
