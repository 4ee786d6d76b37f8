//! Truth validation
//!
//! A three-phase pipeline behind the ordinary [`Validator`] interface:
//!
//! 1. [`RuleBasedChecker`]: deterministic corpus lookups and patterns
//! 2. [`SemanticEnhancer`]: optional model-backed review, allowed to fail
//!    without failing the validator
//! 3. [`IssueMerger`]: signature deduplication and confidence scoring
//!
//! Capability ids detected by the upstream fuzzy validator are fed into
//! phase 1 when that validator ran in an earlier tier.

pub mod enhancer;
pub mod merge;
pub mod rules;

pub use enhancer::{SemanticEnhancer, SemanticReport, SemanticStatus, SkipReason};
pub use merge::{IssueMerger, MergedIssues, Signature};
pub use rules::{RuleBasedChecker, RuleReport, TruthRule};

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};

use super::fuzzy;
use super::{ValidationContext, Validator};
use crate::cache::ValidationCache;
use crate::client::SemanticBackend;
use crate::config::{EngineConfig, SemanticConfig, TruthConfig};
use crate::contracts::Outcome;
use crate::corpus::{TruthCorpus, TruthRetriever};
use crate::error::{EngineError, Result, ValidatorError};

pub const VALIDATOR_ID: &str = "truth";

/// The three phases built from one `TruthConfig`
#[derive(Clone)]
struct Pipeline {
    checker: Arc<RuleBasedChecker>,
    enhancer: Arc<SemanticEnhancer>,
    merger: Arc<IssueMerger>,
}

/// What every rebuilt pipeline is wired to
struct Sources {
    corpus: Arc<dyn TruthCorpus>,
    cache: Arc<ValidationCache>,
    backend: Option<Arc<dyn SemanticBackend>>,
    retriever: Option<Arc<dyn TruthRetriever>>,
}

impl Sources {
    fn pipeline(&self, config: &TruthConfig) -> Result<Pipeline> {
        Ok(Pipeline {
            checker: Arc::new(RuleBasedChecker::new(&config.rules, Arc::clone(&self.corpus))?),
            enhancer: Arc::new(self.enhancer(config.semantic.clone())),
            merger: Arc::new(IssueMerger::new(&config.merge)),
        })
    }

    fn enhancer(&self, config: SemanticConfig) -> SemanticEnhancer {
        let mut enhancer =
            SemanticEnhancer::new(config, Arc::clone(&self.corpus), Arc::clone(&self.cache));
        if let Some(backend) = &self.backend {
            enhancer = enhancer.with_backend(Arc::clone(backend));
        }
        if let Some(retriever) = &self.retriever {
            enhancer = enhancer.with_retriever(Arc::clone(retriever));
        }
        enhancer
    }
}

/// Validates documentation claims against the truth corpus
///
/// Phase settings can be swapped at runtime through
/// [`Validator::reconfigure`]; in-flight validations finish on the
/// settings they started with.
pub struct TruthValidator {
    sources: Sources,
    pipeline: RwLock<Arc<Pipeline>>,
}

impl TruthValidator {
    pub fn new(
        config: &TruthConfig,
        corpus: Arc<dyn TruthCorpus>,
        cache: Arc<ValidationCache>,
    ) -> Result<Self> {
        let sources = Sources {
            corpus,
            cache,
            backend: None,
            retriever: None,
        };
        let pipeline = sources.pipeline(config)?;
        Ok(Self {
            sources,
            pipeline: RwLock::new(Arc::new(pipeline)),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn SemanticBackend>) -> Self {
        self.sources.backend = Some(backend);
        self.refresh_enhancer();
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn TruthRetriever>) -> Self {
        self.sources.retriever = Some(retriever);
        self.refresh_enhancer();
        self
    }

    fn refresh_enhancer(&mut self) {
        let current = self.current();
        let enhancer = Arc::new(self.sources.enhancer(current.enhancer.config().clone()));
        *self.pipeline.get_mut().unwrap_or_else(PoisonError::into_inner) = Arc::new(Pipeline {
            enhancer,
            ..(*current).clone()
        });
    }

    fn current(&self) -> Arc<Pipeline> {
        let guard = self.pipeline.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }
}

#[async_trait]
impl Validator for TruthValidator {
    fn id(&self) -> &str {
        VALIDATOR_ID
    }

    fn description(&self) -> &str {
        "Capability claims checked against the truth corpus"
    }

    fn reconfigure(&self, config: &EngineConfig) -> std::result::Result<(), EngineError> {
        let pipeline = Arc::new(self.sources.pipeline(&config.truth)?);
        *self.pipeline.write().unwrap_or_else(PoisonError::into_inner) = pipeline;
        tracing::debug!(validator = VALIDATOR_ID, "Truth pipeline rebuilt");
        Ok(())
    }

    async fn validate(
        &self,
        content: &str,
        context: &ValidationContext,
    ) -> std::result::Result<Outcome, ValidatorError> {
        let pipeline = self.current();
        let detected = context
            .upstream(fuzzy::VALIDATOR_ID)
            .map(fuzzy::detected_ids)
            .unwrap_or_default();

        let rules = pipeline.checker.check(content, &context.document, &detected);
        let semantic = pipeline
            .enhancer
            .enhance(content, &context.document, &rules, context.remaining())
            .await;

        let rule_count = rules.issues.len();
        let semantic_count = semantic.issues.len();
        let merged = pipeline.merger.merge(rules.issues, semantic.issues);
        let confidence = pipeline.merger.confidence(&merged.issues);

        let mut outcome = Outcome::new(merged.issues, confidence)
            .with_metric("rule_issues", json!(rule_count))
            .with_metric("semantic_issues", json!(semantic_count))
            .with_metric("semantic_dropped", json!(merged.collisions + merged.duplicates))
            .with_metric("references_checked", json!(rules.references_checked))
            .with_metric("unknown_references", json!(rules.unknown.len()));

        outcome = match semantic.status {
            SemanticStatus::Applied { cached, received, .. } => outcome
                .with_metric("semantic_status", json!("applied"))
                .with_metric("semantic_cached", json!(cached))
                .with_metric("semantic_received", json!(received)),
            SemanticStatus::Skipped(reason) => {
                let outcome = outcome
                    .with_metric("semantic_status", json!("skipped"))
                    .with_metric("skip_reason", json!(reason.as_str()));
                if reason.is_transient() {
                    outcome.uncacheable()
                } else {
                    outcome
                }
            }
        };

        tracing::debug!(
            file = %context.document.file_path,
            rule_issues = rule_count,
            semantic_issues = semantic_count,
            confidence,
            "Truth validation complete"
        );

        Ok(outcome)
    }
}
