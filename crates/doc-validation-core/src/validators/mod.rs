//! Validator contract and built-in validators
//!
//! The scheduler only ever sees [`Validator`]: an id plus an async
//! `validate(content, context) -> Outcome`. Concrete validators are selected
//! by id through the registry and never branched on by type.

pub mod frontmatter;
pub mod fuzzy;
pub mod truth;

pub use frontmatter::FrontmatterValidator;
pub use fuzzy::FuzzyMatchValidator;
pub use truth::TruthValidator;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::contracts::{DocumentContext, Outcome};
use crate::error::{EngineError, ValidatorError};

/// Context handed to a validator invocation
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub document: DocumentContext,
    upstream: Arc<BTreeMap<String, Outcome>>,
    deadline: Option<Instant>,
}

impl ValidationContext {
    pub fn new(document: DocumentContext) -> Self {
        Self {
            document,
            upstream: Arc::new(BTreeMap::new()),
            deadline: None,
        }
    }

    /// Outcomes produced by earlier tiers
    pub fn with_upstream(mut self, upstream: Arc<BTreeMap<String, Outcome>>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Deadline of this call: the per-call timeout capped by the tier deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Outcome of an earlier validator, if it ran
    pub fn upstream(&self, validator_id: &str) -> Option<&Outcome> {
        self.upstream.get(validator_id)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the call deadline; `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// A unit of validation selected by id
///
/// Implementations must not block the executor: the scheduler runs them as
/// independent tasks and cancels them at the tier deadline.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Unique identifier used in tier configuration and requests
    fn id(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Pick up settings from a reloaded configuration
    ///
    /// Called only with configurations that already passed validation.
    fn reconfigure(&self, _config: &EngineConfig) -> Result<(), EngineError> {
        Ok(())
    }

    /// Validate one document
    async fn validate(
        &self,
        content: &str,
        context: &ValidationContext,
    ) -> Result<Outcome, ValidatorError>;
}
