//! Documentation Validation Engine
//!
//! Validates documentation content (Markdown with optional YAML frontmatter)
//! through a configurable set of validators organised into execution tiers.
//!
//! ## Features
//!
//! - **Tiered Scheduling**: validators grouped into tiers that run in order,
//!   each tier fanning out in parallel or running sequentially
//! - **Dependencies**: a validator can consume the outcomes of validators in
//!   earlier tiers; cycles and unresolvable chains are rejected at load time
//! - **Early Termination**: later tiers are skipped once a critical issue or
//!   an error threshold is reached
//! - **Truth Validation**: capability claims checked against a truth corpus
//!   by deterministic rules, optionally refined by a model-backed service
//! - **Caching**: validator outcomes and model responses memoised with
//!   separate TTLs; cache failures degrade to misses
//! - **Telemetry**: `tracing` logs and Prometheus metrics
//!
//! ## Architecture
//!
//! 1. **Contracts** (`contracts/`): issues, outcomes and results
//! 2. **Engine** (`engine/`): registry, tier planning and the scheduler
//! 3. **Validators** (`validators/`): the validator contract plus the
//!    built-in `frontmatter`, `fuzzy` and `truth` validators
//! 4. **Client** (`client/`): semantic enhancement backends
//! 5. **Cache** (`cache/`): outcome and response stores
//! 6. **Telemetry** (`telemetry/`): metrics, tracing setup and result sinks
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use doc_validation_core::{
//!     DocumentContext, EngineConfig, InMemoryTruthCorpus, TieredScheduler,
//!     TruthEntry, ValidationCache, ValidatorRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> doc_validation_core::Result<()> {
//!     let config = EngineConfig::default();
//!     let corpus = Arc::new(InMemoryTruthCorpus::new(vec![
//!         TruthEntry::new("pdf-export", "PDF Export"),
//!     ]));
//!     let cache = Arc::new(ValidationCache::new(&config.cache));
//!     let registry =
//!         ValidatorRegistry::with_builtins(&config, corpus, Arc::clone(&cache), None)?;
//!     let scheduler = TieredScheduler::new(config, registry, cache)?;
//!
//!     let document = DocumentContext::new("guide.md", "words", "default");
//!     let selected = vec!["frontmatter".to_string(), "fuzzy".to_string(), "truth".to_string()];
//!     let result = scheduler
//!         .execute("---\ntitle: Guide\n---\nUses plugin pdf-export.", &document, &selected)
//!         .await?;
//!
//!     println!("{} issues, confidence {:.2}", result.issues.len(), result.confidence);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod corpus;
pub mod document;
pub mod engine;
pub mod error;
pub mod telemetry;
pub mod validators;

// Contracts module - located at ../contracts relative to src/
#[path = "../contracts/mod.rs"]
pub mod contracts;

pub use cache::{CacheStats, ManualClock, OutcomeKey, PromptKey, ValidationCache};
pub use client::{HttpSemanticBackend, SemanticBackend, StaticSemanticBackend};
pub use config::{
    CacheConfig, EarlyTerminationConfig, EngineConfig, ExecutionMode, FrontmatterConfig,
    SemanticConfig, TierConfig, TruthConfig,
};
pub use contracts::{
    category, DocumentContext, Issue, IssueBuilder, Location, Outcome, Provenance,
    SemanticFinding, SemanticPrompt, SemanticResponse, Severity, ValidationResult,
};
pub use corpus::{InMemoryTruthCorpus, TruthCorpus, TruthEntry, TruthRetriever};
pub use engine::{TieredScheduler, ValidatorRegistry};
pub use error::{CacheError, EngineError, EnhancerError, Result, ValidatorError};
pub use telemetry::{
    init_tracing, EngineMetrics, EngineMetricsRegistry, MemorySink, ResultSink, TracingFormat,
    TracingSink,
};
pub use validators::{ValidationContext, Validator};

/// Engine version (from Cargo.toml)
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
