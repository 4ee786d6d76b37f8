//! Validator registry
//!
//! Maps validator ids to implementations. The scheduler resolves every id
//! through here and only ever calls the [`Validator`] contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::ValidationCache;
use crate::client::SemanticBackend;
use crate::config::EngineConfig;
use crate::corpus::TruthCorpus;
use crate::error::{EngineError, Result};
use crate::validators::{FrontmatterValidator, FuzzyMatchValidator, TruthValidator, Validator};

/// Id-indexed set of validators
#[derive(Default, Clone)]
pub struct ValidatorRegistry {
    validators: BTreeMap<String, Arc<dyn Validator>>,
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.ids())
            .finish()
    }
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `frontmatter`, `fuzzy` and `truth` validators, set up
    /// from the `frontmatter` and `truth` sections of `config`
    pub fn with_builtins(
        config: &EngineConfig,
        corpus: Arc<dyn TruthCorpus>,
        cache: Arc<ValidationCache>,
        backend: Option<Arc<dyn SemanticBackend>>,
    ) -> Result<Self> {
        let mut truth = TruthValidator::new(&config.truth, Arc::clone(&corpus), cache)?;
        if let Some(backend) = backend {
            truth = truth.with_backend(backend);
        }

        let mut registry = Self::new();
        registry.register(Arc::new(FrontmatterValidator::new(config.frontmatter.clone())))?;
        registry.register(Arc::new(FuzzyMatchValidator::new(corpus)))?;
        registry.register(Arc::new(truth))?;
        Ok(registry)
    }

    /// Add a validator; ids must be unique
    pub fn register(&mut self, validator: Arc<dyn Validator>) -> Result<()> {
        let id = validator.id().to_string();
        if id.trim().is_empty() {
            return Err(EngineError::invalid_config("validator id must not be empty"));
        }
        if self.validators.contains_key(&id) {
            return Err(EngineError::DuplicateValidator(id));
        }
        tracing::debug!(validator = %id, "Registered validator");
        self.validators.insert(id, validator);
        Ok(())
    }

    /// Add or replace a validator
    pub fn replace(&mut self, validator: Arc<dyn Validator>) {
        self.validators.insert(validator.id().to_string(), validator);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.validators.contains_key(id)
    }

    /// Registered validators in id order
    pub fn validators(&self) -> impl Iterator<Item = &Arc<dyn Validator>> {
        self.validators.values()
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.validators.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
