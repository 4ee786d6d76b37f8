//! Integration tests for the tiered validation engine
//!
//! Exercises the scheduler end to end with the built-in validators:
//! - Tier ordering, dependencies and early termination
//! - Failure isolation inside a tier
//! - Outcome caching, TTL expiry and invalidation
//! - Truth validation with and without semantic enhancement
//! - Call and tier deadlines during the semantic phase
//! - Configuration reloads reaching the validators
//! - Metrics and result sinks

use async_trait::async_trait;
use doc_validation_core::cache::{CacheStore, ManualClock};
use doc_validation_core::contracts::{
    category, DocumentContext, Issue, Outcome, Provenance, SemanticFinding, SemanticResponse,
    Severity,
};
use doc_validation_core::{
    CacheConfig, CacheError, EngineConfig, EngineError, EngineMetricsRegistry, EnhancerError,
    FrontmatterConfig, InMemoryTruthCorpus, MemorySink, SemanticBackend, StaticSemanticBackend,
    TieredScheduler, TierConfig, TruthCorpus, TruthEntry, ValidationCache, ValidationContext,
    Validator, ValidatorError, ValidatorRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const GUIDE: &str = "---\ntitle: Export guide\nplugins:\n  - pdf-export\n---\n\
# Exporting\n\nUses plugin pdf-export to render pages.\n\
The Legacy Renderer is still mentioned here.\n\
Uses plugin X for charts.\n";

/// Counts invocations and reports one informational issue
struct CountingValidator {
    id: &'static str,
    calls: AtomicUsize,
}

impl CountingValidator {
    fn new(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for CountingValidator {
    fn id(&self) -> &str {
        self.id
    }

    async fn validate(
        &self,
        _content: &str,
        _context: &ValidationContext,
    ) -> Result<Outcome, ValidatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let issue = Issue::builder(self.id, "COUNTED", "test")
            .level(Severity::Info)
            .build(format!("{} ran", self.id));
        Ok(Outcome::new(vec![issue], 1.0))
    }
}

/// Reports one critical issue
struct GateValidator;

#[async_trait]
impl Validator for GateValidator {
    fn id(&self) -> &str {
        "gate"
    }

    async fn validate(
        &self,
        _content: &str,
        _context: &ValidationContext,
    ) -> Result<Outcome, ValidatorError> {
        let issue = Issue::builder("gate", "GATE_CLOSED", "test")
            .level(Severity::Critical)
            .build("Document is blocked");
        Ok(Outcome::new(vec![issue], 1.0))
    }
}

/// Always fails
struct FailingValidator;

#[async_trait]
impl Validator for FailingValidator {
    fn id(&self) -> &str {
        "failing"
    }

    async fn validate(
        &self,
        _content: &str,
        _context: &ValidationContext,
    ) -> Result<Outcome, ValidatorError> {
        Err(ValidatorError::failed("dictionary unavailable"))
    }
}

/// Panics mid-validation
struct PanickingValidator;

#[async_trait]
impl Validator for PanickingValidator {
    fn id(&self) -> &str {
        "panicking"
    }

    async fn validate(
        &self,
        _content: &str,
        _context: &ValidationContext,
    ) -> Result<Outcome, ValidatorError> {
        panic!("index out of range")
    }
}

/// A cache store whose backing service is down
struct UnreachableStore;

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheStore<V> for UnreachableStore {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn get(&self, _key: &str) -> Result<Option<V>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: V) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// Helper to create the truth corpus used throughout
fn corpus() -> Arc<dyn TruthCorpus> {
    Arc::new(InMemoryTruthCorpus::new(vec![
        TruthEntry::new("pdf-export", "PDF Export").with_alias("pdf exporter"),
        TruthEntry::new("legacy-render", "Legacy Renderer").deprecated_by("pdf-export"),
        TruthEntry::new("image-resize", "Image Resize"),
    ]))
}

fn document() -> DocumentContext {
    DocumentContext::new("docs/export.md", "words", "default")
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn all_builtins() -> Vec<String> {
    ids(&["frontmatter", "fuzzy", "truth"])
}

/// Builtins plus extra validators, scheduled with `config`
fn build_scheduler(
    config: EngineConfig,
    cache: Arc<ValidationCache>,
    backend: Option<Arc<dyn SemanticBackend>>,
    extra: Vec<Arc<dyn Validator>>,
) -> TieredScheduler {
    let mut registry =
        ValidatorRegistry::with_builtins(&config, corpus(), Arc::clone(&cache), backend)
            .unwrap();
    for validator in extra {
        registry.register(validator).unwrap();
    }
    TieredScheduler::new(config, registry, cache).unwrap()
}

fn default_scheduler(cache: Arc<ValidationCache>) -> TieredScheduler {
    build_scheduler(EngineConfig::default(), cache, None, Vec::new())
}

/// Default tiers with a counting validator added to the first tier
fn counted_config() -> EngineConfig {
    EngineConfig::with_tiers(vec![
        TierConfig::parallel("structure", &["frontmatter", "fuzzy", "counter"]),
        TierConfig::sequential("truth", &["truth"]).with_dependency("truth", "fuzzy"),
    ])
}

fn counted_selection() -> Vec<String> {
    ids(&["frontmatter", "fuzzy", "counter", "truth"])
}

fn enabled_semantic(mut config: EngineConfig) -> EngineConfig {
    config.truth.semantic.enabled = true;
    config.truth.semantic.min_content_len = 1;
    config
}

#[tokio::test]
async fn test_empty_selection_returns_clean_result() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let result = scheduler.execute(GUIDE, &document(), &[]).await.unwrap();

    assert!(result.issues.is_empty());
    assert_eq!(result.confidence, 1.0);
    assert!(!result.early_terminated);
    assert!(result.validators.is_empty());
}

#[tokio::test]
async fn test_full_pipeline_order() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let result = scheduler
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();

    assert_eq!(result.validators, all_builtins());
    assert!(!result.early_terminated);

    // Tier order, then declaration order
    let rank = |rule: &str| match rule {
        "frontmatter" => 0,
        "fuzzy" => 1,
        _ => 2,
    };
    let ranks: Vec<u8> = result.issues.iter().map(|i| rank(&i.rule_id)).collect();
    let mut sorted = ranks.clone();
    sorted.sort();
    assert_eq!(ranks, sorted);

    let codes: Vec<&str> = result.issues.iter().map(|i| i.code.as_str()).collect();
    assert!(codes.contains(&"TRUTH_UNKNOWN_REFERENCE"));
    assert!(codes.contains(&"TRUTH_DEPRECATED"));
    assert!(!result.is_valid());
}

#[tokio::test]
async fn test_cold_runs_are_deterministic() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let first = scheduler
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();
    let second = scheduler
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&first.issues).unwrap(),
        serde_json::to_string(&second.issues).unwrap()
    );
    assert_eq!(first.confidence, second.confidence);
    assert_ne!(first.request_id, second.request_id);
}

#[tokio::test]
async fn test_selection_order_does_not_change_result() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let forward = scheduler
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();
    let reversed = scheduler
        .execute(GUIDE, &document(), &ids(&["truth", "fuzzy", "frontmatter"]))
        .await
        .unwrap();

    assert_eq!(forward.issues, reversed.issues);
    assert_eq!(forward.validators, reversed.validators);
}

#[tokio::test]
async fn test_warm_run_matches_cold_run_without_reexecution() {
    let counter = CountingValidator::new("counter");
    let cache = Arc::new(ValidationCache::new(&CacheConfig::default()));
    let scheduler = build_scheduler(
        counted_config(),
        Arc::clone(&cache),
        None,
        vec![counter.clone() as Arc<dyn Validator>],
    );

    let cold = scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    let warm = scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();

    assert_eq!(counter.calls(), 1);
    assert_eq!(cold.issues, warm.issues);
    assert_eq!(cold.confidence, warm.confidence);
    assert_eq!(cold.validators, warm.validators);
    assert_eq!(warm.metrics["cache_hits"], serde_json::json!(4));
    assert_eq!(warm.metrics["validators_executed"], serde_json::json!(0));
    assert_eq!(cache.stats().outcome_hits, 4);
}

#[tokio::test]
async fn test_cache_is_keyed_by_content_and_selection() {
    let counter = CountingValidator::new("counter");
    let scheduler = build_scheduler(
        counted_config(),
        Arc::new(ValidationCache::new(&CacheConfig::default())),
        None,
        vec![counter.clone() as Arc<dyn Validator>],
    );

    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    scheduler
        .execute("Different text.", &document(), &counted_selection())
        .await
        .unwrap();
    scheduler
        .execute(GUIDE, &document(), &ids(&["counter"]))
        .await
        .unwrap();

    assert_eq!(counter.calls(), 3);
}

#[tokio::test]
async fn test_expired_outcomes_are_recomputed() {
    let clock = Arc::new(ManualClock::default());
    let counter = CountingValidator::new("counter");
    let cache = Arc::new(ValidationCache::with_clock(
        &CacheConfig::default(),
        clock.clone(),
    ));
    let scheduler = build_scheduler(
        counted_config(),
        cache,
        None,
        vec![counter.clone() as Arc<dyn Validator>],
    );

    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(299));
    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    assert_eq!(counter.calls(), 1);

    clock.advance(chrono::Duration::seconds(2));
    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    assert_eq!(counter.calls(), 2);
}

#[tokio::test]
async fn test_config_reload_invalidates_cache() {
    let counter = CountingValidator::new("counter");
    let scheduler = build_scheduler(
        counted_config(),
        Arc::new(ValidationCache::new(&CacheConfig::default())),
        None,
        vec![counter.clone() as Arc<dyn Validator>],
    );

    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    scheduler.reload_config(counted_config()).await.unwrap();
    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();

    assert_eq!(counter.calls(), 2);
}

#[tokio::test]
async fn test_reload_applies_truth_settings() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let before = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();
    assert!((before.confidence - 0.4).abs() < 1e-9);

    let mut config = EngineConfig::default();
    config.truth.merge.severity_weights.error = 0.1;
    scheduler.reload_config(config).await.unwrap();

    let after = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();
    assert!((after.confidence - 0.9).abs() < 1e-9);
    assert_eq!(scheduler.config().truth.merge.severity_weights.error, 0.1);
}

#[tokio::test]
async fn test_reload_applies_frontmatter_settings() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let content = "---\ntitle: Guide\n---\nBody.";

    let mut config = EngineConfig::default();
    config.frontmatter.required_keys = ids(&["title", "owner"]);
    scheduler.reload_config(config).await.unwrap();

    let result = scheduler
        .execute(content, &document(), &ids(&["frontmatter"]))
        .await
        .unwrap();
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].code, "FM_MISSING_KEY");
}

#[tokio::test]
async fn test_rejected_reload_leaves_validators_unchanged() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let content = "---\ntitle: Guide\n---\nUses plugin X";

    // Passes structural checks, but the truth pattern does not compile
    let mut config = EngineConfig::default();
    config.frontmatter.required_keys = ids(&["title", "owner"]);
    config.truth.rules.reference_patterns = vec!["plugin ([a-z".to_string()];
    assert!(scheduler.reload_config(config).await.is_err());

    let result = scheduler
        .execute(content, &document(), &ids(&["frontmatter", "truth"]))
        .await
        .unwrap();
    let codes: Vec<&str> = result.issues.iter().map(|i| i.code.as_str()).collect();
    assert_eq!(codes, vec!["TRUTH_UNKNOWN_REFERENCE"]);
    assert_eq!(scheduler.config().frontmatter.required_keys, ids(&["title"]));
}

#[tokio::test]
async fn test_reload_rejects_cache_changes() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::new(&CacheConfig::default())));
    let mut config = EngineConfig::default();
    config.cache.outcome_ttl_secs = 60;

    let err = scheduler.reload_config(config).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
    assert_eq!(scheduler.config().cache.outcome_ttl_secs, 300);
}

#[tokio::test]
async fn test_truth_reload_invalidates_outcomes() {
    let counter = CountingValidator::new("counter");
    let scheduler = build_scheduler(
        counted_config(),
        Arc::new(ValidationCache::new(&CacheConfig::default())),
        None,
        vec![counter.clone() as Arc<dyn Validator>],
    );

    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    scheduler.truth_reloaded().await;
    scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();

    assert_eq!(counter.calls(), 2);
}

#[tokio::test]
async fn test_unreachable_cache_degrades_to_misses() {
    let counter = CountingValidator::new("counter");
    let cache = Arc::new(ValidationCache::with_stores(
        Arc::new(UnreachableStore),
        Arc::new(UnreachableStore),
    ));
    let scheduler = build_scheduler(
        counted_config(),
        Arc::clone(&cache),
        None,
        vec![counter.clone() as Arc<dyn Validator>],
    );

    let first = scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();
    let second = scheduler
        .execute(GUIDE, &document(), &counted_selection())
        .await
        .unwrap();

    assert_eq!(counter.calls(), 2);
    assert_eq!(first.issues, second.issues);
    assert!(cache.stats().store_errors > 0);
}

#[tokio::test]
async fn test_unknown_plugin_yields_single_rule_issue() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let result = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();

    assert_eq!(result.issues.len(), 1);
    let issue = &result.issues[0];
    assert_eq!(issue.category, category::TRUTH);
    assert_eq!(issue.level, Severity::Error);
    assert_eq!(issue.provenance, Provenance::RuleBased);
    assert_eq!(issue.code, "TRUTH_UNKNOWN_REFERENCE");
    assert!((result.confidence - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn test_semantic_duplicate_of_rule_issue_is_dropped() {
    let backend = Arc::new(StaticSemanticBackend::new(SemanticResponse {
        findings: vec![
            SemanticFinding {
                category: "truth".to_string(),
                subcategory: None,
                message: "Referenced capability 'X' is not in the truth corpus".to_string(),
                level: Severity::Error,
                confidence: 0.95,
                line: Some(1),
                suggestion: None,
            },
            SemanticFinding {
                category: "truth".to_string(),
                subcategory: Some("claim".to_string()),
                message: "Charts are not produced by any listed capability".to_string(),
                level: Severity::Warning,
                confidence: 0.9,
                line: Some(1),
                suggestion: None,
            },
        ],
        model: Some("review-model".to_string()),
    }));
    let scheduler = build_scheduler(
        enabled_semantic(EngineConfig::default()),
        Arc::new(ValidationCache::disabled()),
        Some(backend.clone() as Arc<dyn SemanticBackend>),
        Vec::new(),
    );

    let result = scheduler
        .execute("Uses plugin X for charts", &document(), &ids(&["truth"]))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert_eq!(result.issues.len(), 2);
    assert_eq!(result.issues[0].provenance, Provenance::RuleBased);
    assert_eq!(result.issues[0].code, "TRUTH_UNKNOWN_REFERENCE");
    assert_eq!(result.issues[1].provenance, Provenance::LlmSemantic);
}

#[tokio::test]
async fn test_low_confidence_semantic_findings_are_filtered() {
    let backend = Arc::new(StaticSemanticBackend::new(SemanticResponse {
        findings: vec![SemanticFinding {
            category: "truth".to_string(),
            subcategory: None,
            message: "Possibly outdated screenshot".to_string(),
            level: Severity::Info,
            confidence: 0.2,
            line: None,
            suggestion: None,
        }],
        model: None,
    }));
    let scheduler = build_scheduler(
        enabled_semantic(EngineConfig::default()),
        Arc::new(ValidationCache::disabled()),
        Some(backend as Arc<dyn SemanticBackend>),
        Vec::new(),
    );

    let result = scheduler
        .execute("Plain prose about exporting.", &document(), &ids(&["truth"]))
        .await
        .unwrap();
    assert!(result.issues.is_empty());
    assert_eq!(result.confidence, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_semantic_backend_degrades_to_rule_result() {
    let disabled = default_scheduler(Arc::new(ValidationCache::disabled()));
    let baseline = disabled
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();

    let backend = Arc::new(
        StaticSemanticBackend::new(SemanticResponse::default()).with_delay(Duration::from_secs(60)),
    );
    let metrics = EngineMetricsRegistry::new().unwrap();
    let slow = build_scheduler(
        enabled_semantic(EngineConfig::default()),
        Arc::new(ValidationCache::disabled()),
        Some(backend.clone() as Arc<dyn SemanticBackend>),
        Vec::new(),
    )
    .with_metrics(metrics.engine());
    let degraded = slow
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert_eq!(baseline.issues, degraded.issues);
    assert_eq!(baseline.confidence, degraded.confidence);
    assert!(degraded
        .issues
        .iter()
        .all(|i| i.category != category::VALIDATOR_INTERNAL));

    let text = metrics.encode_text().unwrap();
    assert!(text.contains("doc_validation_semantic_skips_total"));
    assert!(text.contains("reason=\"timeout\""));
}

#[tokio::test]
async fn test_failing_semantic_backend_degrades_to_rule_result() {
    let baseline = default_scheduler(Arc::new(ValidationCache::disabled()))
        .execute(GUIDE, &document(), &ids(&["truth"]))
        .await
        .unwrap();

    let backend = Arc::new(StaticSemanticBackend::failing(
        EnhancerError::Http("connection reset".to_string()),
    ));
    let degraded = build_scheduler(
        enabled_semantic(EngineConfig::default()),
        Arc::new(ValidationCache::disabled()),
        Some(backend as Arc<dyn SemanticBackend>),
        Vec::new(),
    )
    .execute(GUIDE, &document(), &ids(&["truth"]))
    .await
    .unwrap();

    assert_eq!(baseline.issues, degraded.issues);
    assert_eq!(baseline.confidence, degraded.confidence);
}

/// Asserts `result` is the plain rule-based verdict on "Uses plugin X"
fn assert_rule_verdict_only(result: &doc_validation_core::ValidationResult) {
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].code, "TRUTH_UNKNOWN_REFERENCE");
    assert_eq!(result.issues[0].provenance, Provenance::RuleBased);
    assert!(result
        .issues
        .iter()
        .all(|i| i.category != category::VALIDATOR_INTERNAL));
    assert_eq!(result.metrics["validator_failures"], serde_json::json!(0));
    assert!((result.confidence - 0.4).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_bounds_semantic_phase() {
    // Per-call limit well below the semantic timeout
    let config = enabled_semantic(EngineConfig::with_tiers(vec![TierConfig::sequential(
        "truth",
        &["truth"],
    )
    .with_call_timeout_ms(1_000)]));
    let backend = Arc::new(
        StaticSemanticBackend::new(SemanticResponse::default()).with_delay(Duration::from_secs(60)),
    );
    let metrics = EngineMetricsRegistry::new().unwrap();
    let scheduler = build_scheduler(
        config,
        Arc::new(ValidationCache::disabled()),
        Some(backend.clone() as Arc<dyn SemanticBackend>),
        Vec::new(),
    )
    .with_metrics(metrics.engine());

    let result = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert_rule_verdict_only(&result);
    assert!(metrics.encode_text().unwrap().contains("reason=\"timeout\""));
}

#[tokio::test(start_paused = true)]
async fn test_tier_deadline_during_semantic_phase_keeps_rule_issues() {
    // Default per-call timeout; the tier deadline is the binding limit
    let config = enabled_semantic(EngineConfig::with_tiers(vec![TierConfig::sequential(
        "truth",
        &["truth"],
    )
    .with_timeout_ms(1_000)]));
    let backend = Arc::new(
        StaticSemanticBackend::new(SemanticResponse::default()).with_delay(Duration::from_secs(60)),
    );
    let metrics = EngineMetricsRegistry::new().unwrap();
    let scheduler = build_scheduler(
        config,
        Arc::new(ValidationCache::disabled()),
        Some(backend.clone() as Arc<dyn SemanticBackend>),
        Vec::new(),
    )
    .with_metrics(metrics.engine());

    let result = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert_rule_verdict_only(&result);
    let text = metrics.encode_text().unwrap();
    assert!(text.contains("doc_validation_semantic_skips_total"));
    assert!(text.contains("reason=\"timeout\""));
}

#[tokio::test]
async fn test_degraded_truth_outcome_is_not_cached() {
    let backend = Arc::new(StaticSemanticBackend::failing(EnhancerError::Http(
        "connection reset".to_string(),
    )));
    let cache = Arc::new(ValidationCache::new(&CacheConfig::default()));
    let scheduler = build_scheduler(
        enabled_semantic(EngineConfig::default()),
        Arc::clone(&cache),
        Some(backend.clone() as Arc<dyn SemanticBackend>),
        Vec::new(),
    );

    let first = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();
    let second = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();

    // The service gets another chance on the next run
    assert_eq!(backend.calls(), 2);
    assert_eq!(second.metrics["cache_hits"], serde_json::json!(0));
    assert_eq!(second.metrics["validators_executed"], serde_json::json!(1));
    assert_eq!(first.issues, second.issues);
}

#[tokio::test]
async fn test_completed_semantic_outcome_is_cached() {
    let backend = Arc::new(StaticSemanticBackend::new(SemanticResponse::default()));
    let scheduler = build_scheduler(
        enabled_semantic(EngineConfig::default()),
        Arc::new(ValidationCache::new(&CacheConfig::default())),
        Some(backend.clone() as Arc<dyn SemanticBackend>),
        Vec::new(),
    );

    for _ in 0..2 {
        scheduler
            .execute("Uses plugin X", &document(), &ids(&["truth"]))
            .await
            .unwrap();
    }
    let warm = scheduler
        .execute("Uses plugin X", &document(), &ids(&["truth"]))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
    assert_eq!(warm.metrics["cache_hits"], serde_json::json!(1));
}

#[tokio::test]
async fn test_semantic_responses_are_cached_across_outcome_invalidation() {
    let backend = Arc::new(StaticSemanticBackend::new(SemanticResponse::default()));
    let scheduler = build_scheduler(
        enabled_semantic(EngineConfig::default()),
        Arc::new(ValidationCache::new(&CacheConfig::default())),
        Some(backend.clone() as Arc<dyn SemanticBackend>),
        Vec::new(),
    );

    scheduler
        .execute(GUIDE, &document(), &ids(&["truth"]))
        .await
        .unwrap();
    scheduler.truth_reloaded().await;
    scheduler
        .execute(GUIDE, &document(), &ids(&["truth"]))
        .await
        .unwrap();

    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_critical_issue_skips_later_tiers() {
    let counter = CountingValidator::new("counter");
    let config = EngineConfig::with_tiers(vec![
        TierConfig::parallel("gate", &["gate", "frontmatter"]),
        TierConfig::parallel("structure", &["fuzzy", "counter"]),
        TierConfig::sequential("truth", &["truth"]).with_dependency("truth", "fuzzy"),
    ]);
    let scheduler = build_scheduler(
        config,
        Arc::new(ValidationCache::disabled()),
        None,
        vec![
            Arc::new(GateValidator) as Arc<dyn Validator>,
            counter.clone() as Arc<dyn Validator>,
        ],
    );

    let result = scheduler
        .execute(
            GUIDE,
            &document(),
            &ids(&["gate", "frontmatter", "fuzzy", "counter", "truth"]),
        )
        .await
        .unwrap();

    assert!(result.early_terminated);
    assert_eq!(result.terminated_after.as_deref(), Some("gate"));
    assert_eq!(counter.calls(), 0);
    assert_eq!(result.validators, ids(&["gate", "frontmatter"]));
    assert_eq!(result.count_at(Severity::Critical), 1);
}

#[tokio::test]
async fn test_early_termination_can_be_disabled() {
    let counter = CountingValidator::new("counter");
    let mut config = EngineConfig::with_tiers(vec![
        TierConfig::parallel("gate", &["gate"]),
        TierConfig::parallel("rest", &["counter"]),
    ]);
    config.early_termination.on_critical = false;
    let scheduler = build_scheduler(
        config,
        Arc::new(ValidationCache::disabled()),
        None,
        vec![
            Arc::new(GateValidator) as Arc<dyn Validator>,
            counter.clone() as Arc<dyn Validator>,
        ],
    );

    let result = scheduler
        .execute(GUIDE, &document(), &ids(&["gate", "counter"]))
        .await
        .unwrap();
    assert!(!result.early_terminated);
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn test_failing_validator_is_isolated() {
    let config = EngineConfig::with_tiers(vec![TierConfig::parallel(
        "checks",
        &["frontmatter", "failing", "counter"],
    )]);
    let counter = CountingValidator::new("counter");
    let scheduler = build_scheduler(
        config,
        Arc::new(ValidationCache::disabled()),
        None,
        vec![
            Arc::new(FailingValidator) as Arc<dyn Validator>,
            counter.clone() as Arc<dyn Validator>,
        ],
    );

    let content = "---\ntitle: Fine\n---\nBody.";
    let result = scheduler
        .execute(content, &document(), &ids(&["frontmatter", "failing", "counter"]))
        .await
        .unwrap();

    assert_eq!(result.issues.len(), 2);
    let internal: Vec<&Issue> = result
        .issues
        .iter()
        .filter(|i| i.category == category::VALIDATOR_INTERNAL)
        .collect();
    assert_eq!(internal.len(), 1);
    assert_eq!(internal[0].code, "VALIDATOR_FAILED");
    assert_eq!(internal[0].rule_id, "failing");
    assert!(internal[0].message.contains("dictionary unavailable"));
    assert_eq!(result.issues[1].code, "COUNTED");
    assert_eq!(result.metrics["validator_failures"], serde_json::json!(1));
}

#[tokio::test]
async fn test_panicking_validator_is_isolated() {
    let config = EngineConfig::with_tiers(vec![TierConfig::parallel(
        "checks",
        &["panicking", "counter"],
    )]);
    let counter = CountingValidator::new("counter");
    let scheduler = build_scheduler(
        config,
        Arc::new(ValidationCache::disabled()),
        None,
        vec![
            Arc::new(PanickingValidator) as Arc<dyn Validator>,
            counter.clone() as Arc<dyn Validator>,
        ],
    );

    let result = scheduler
        .execute(GUIDE, &document(), &ids(&["panicking", "counter"]))
        .await
        .unwrap();

    assert_eq!(result.issues.len(), 2);
    assert_eq!(result.issues[0].category, category::VALIDATOR_INTERNAL);
    assert!(result.issues[0].message.contains("index out of range"));
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let config = EngineConfig::with_tiers(vec![TierConfig::parallel("checks", &["failing"])]);
    let cache = Arc::new(ValidationCache::new(&CacheConfig::default()));
    let scheduler = build_scheduler(
        config,
        Arc::clone(&cache),
        None,
        vec![Arc::new(FailingValidator) as Arc<dyn Validator>],
    );

    scheduler
        .execute(GUIDE, &document(), &ids(&["failing"]))
        .await
        .unwrap();
    let second = scheduler
        .execute(GUIDE, &document(), &ids(&["failing"]))
        .await
        .unwrap();

    assert_eq!(second.metrics["cache_hits"], serde_json::json!(0));
    assert_eq!(cache.stats().outcome_hits, 0);
}

#[tokio::test]
async fn test_unknown_validator_is_rejected() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let err = scheduler
        .execute(GUIDE, &document(), &ids(&["truth", "spelling"]))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::UnknownValidator(ref id) if id == "spelling"));
}

#[test]
fn test_circular_dependency_is_rejected() {
    let config = EngineConfig::with_tiers(vec![
        TierConfig::parallel("one", &["frontmatter"]).with_dependency("frontmatter", "truth"),
        TierConfig::parallel("two", &["fuzzy", "truth"]).with_dependency("truth", "frontmatter"),
    ]);
    let cache = Arc::new(ValidationCache::disabled());
    let registry =
        ValidatorRegistry::with_builtins(&EngineConfig::default(), corpus(), Arc::clone(&cache), None)
            .unwrap();

    let err = match TieredScheduler::new(config, registry, cache) {
        Ok(_) => panic!("cyclic configuration accepted"),
        Err(e) => e,
    };
    assert!(matches!(err, EngineError::CircularDependency(_)));
}

#[test]
fn test_dependencies_declared_in_another_tier_are_rejected() {
    // Dependencies live with the tier that runs the validator
    let config = EngineConfig::with_tiers(vec![
        TierConfig::parallel("structure", &["frontmatter", "fuzzy"]),
        TierConfig::sequential("truth", &["truth"]).with_dependency("truth", "fuzzy"),
        TierConfig::parallel("late", &["counter"]).with_dependency("truth", "frontmatter"),
    ]);
    let cache = Arc::new(ValidationCache::disabled());
    let mut registry =
        ValidatorRegistry::with_builtins(&EngineConfig::default(), corpus(), Arc::clone(&cache), None)
            .unwrap();
    registry
        .register(CountingValidator::new("counter") as Arc<dyn Validator>)
        .unwrap();

    let err = match TieredScheduler::new(config, registry, cache) {
        Ok(_) => panic!("dependency declared outside its tier accepted"),
        Err(e) => e,
    };
    assert!(matches!(err, EngineError::MalformedTier { .. }));
}

#[tokio::test]
async fn test_frontmatter_keys_follow_document_profile() {
    let mut config = EngineConfig::default();
    config.frontmatter = FrontmatterConfig::default()
        .with_profile("reference", &["title", "family"])
        .with_profile("changelog", &["version"]);
    let scheduler = build_scheduler(config, Arc::new(ValidationCache::disabled()), None, Vec::new());
    let content = "---\ntitle: Export\nfamily: words\n---\nBody.";
    let selected = ids(&["frontmatter"]);

    let reference = scheduler
        .execute(content, &DocumentContext::new("ref.md", "words", "reference"), &selected)
        .await
        .unwrap();
    assert!(reference.issues.is_empty());

    let changelog = scheduler
        .execute(content, &DocumentContext::new("changes.md", "words", "changelog"), &selected)
        .await
        .unwrap();
    assert_eq!(changelog.issues.len(), 1);
    assert_eq!(changelog.issues[0].code, "FM_MISSING_KEY");
    assert!(changelog.issues[0].message.contains("version"));
}

#[test]
fn test_unregistered_tier_member_is_rejected() {
    let config = EngineConfig::with_tiers(vec![TierConfig::parallel("one", &["spelling"])]);
    let cache = Arc::new(ValidationCache::disabled());
    let registry =
        ValidatorRegistry::with_builtins(&EngineConfig::default(), corpus(), Arc::clone(&cache), None)
            .unwrap();

    let err = match TieredScheduler::new(config, registry, cache) {
        Ok(_) => panic!("unknown validator accepted"),
        Err(e) => e,
    };
    assert_eq!(err.offending_id(), Some("spelling"));
}

#[tokio::test]
async fn test_results_are_published_to_sink() {
    let scheduler = default_scheduler(Arc::new(ValidationCache::disabled()));
    let sink = MemorySink::new();

    let result = scheduler
        .execute_and_publish(GUIDE, &document(), &all_builtins(), &sink)
        .await
        .unwrap();

    assert_eq!(sink.len(), 1);
    let (published_doc, published) = &sink.results()[0];
    assert_eq!(published_doc.file_path, "docs/export.md");
    assert_eq!(published.request_id, result.request_id);
}

#[tokio::test]
async fn test_run_metrics_are_recorded() {
    let registry = EngineMetricsRegistry::new().unwrap();
    let scheduler =
        default_scheduler(Arc::new(ValidationCache::new(&CacheConfig::default())))
            .with_metrics(registry.engine());

    scheduler
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();
    scheduler
        .execute(GUIDE, &document(), &all_builtins())
        .await
        .unwrap();
    let _ = scheduler
        .execute(GUIDE, &document(), &ids(&["spelling"]))
        .await;

    let text = registry.encode_text().unwrap();
    assert!(text.contains("doc_validation_runs_total"));
    assert!(text.contains("doc_validation_validator_executions_total"));
    assert!(text.contains("result=\"cached\""));
    assert!(text.contains("doc_validation_cache_lookups_total"));
    assert!(text.contains("doc_validation_run_duration_seconds"));
}
