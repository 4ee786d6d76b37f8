//! Tiered validation scheduler
//!
//! Runs a request's selected validators tier by tier:
//!
//! 1. Narrow the configured tiers to the selection (see [`TierPlan`])
//! 2. Per tier, serve cached outcomes, then launch the misses either all at
//!    once (`parallel`) or one at a time (`sequential`) under a per-call
//!    timeout and a tier-wide deadline
//! 3. Convert every validator failure (error, panic, timeout, malformed
//!    outcome) into one synthetic `validator_internal` issue
//! 4. Between tiers, stop early if the termination policy triggers
//! 5. Aggregate in tier order, then declaration order, then each
//!    validator's own issue order
//!
//! Only configuration errors are returned as `Err`.

pub mod plan;
pub mod registry;

pub use plan::{ScheduledTier, TierPlan};
pub use registry::ValidatorRegistry;

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

use crate::cache::{content_fingerprint, selection_fingerprint, OutcomeKey, ValidationCache};
use crate::config::{EarlyTerminationConfig, EngineConfig, ExecutionMode};
use crate::contracts::{
    category, DocumentContext, Issue, Outcome, Severity, ValidationResult,
};
use crate::error::{EngineError, Result, ValidatorError};
use crate::telemetry::{EngineMetrics, ResultSink};
use crate::validators::{ValidationContext, Validator};

/// Extra time a task gets past the tier deadline before it is aborted, so
/// the validator's own deadline-bounded timeout reports first
const ABORT_GRACE: Duration = Duration::from_millis(50);

struct SchedulerState {
    config: EngineConfig,
    plan: TierPlan,
}

/// How a validator's outcome was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Cache,
    Executed,
    Failed,
}

struct Contribution {
    validator: String,
    outcome: Outcome,
    source: Source,
}

/// Dependency-aware, tiered validator scheduler
pub struct TieredScheduler {
    registry: Arc<ValidatorRegistry>,
    cache: Arc<ValidationCache>,
    state: RwLock<Arc<SchedulerState>>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl TieredScheduler {
    /// Validate `config` against `registry` and create the scheduler
    pub fn new(
        config: EngineConfig,
        registry: ValidatorRegistry,
        cache: Arc<ValidationCache>,
    ) -> Result<Self> {
        let plan = TierPlan::build(&config, &registry)?;
        tracing::info!(
            tiers = plan.tier_count(),
            validators = registry.len(),
            "Tiered scheduler configured"
        );

        Ok(Self {
            registry: Arc::new(registry),
            cache,
            state: RwLock::new(Arc::new(SchedulerState { config, plan })),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<ValidationCache> {
        &self.cache
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Current configuration
    pub fn config(&self) -> EngineConfig {
        self.snapshot().config.clone()
    }

    fn snapshot(&self) -> Arc<SchedulerState> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the configuration and drop every cached entry
    ///
    /// The new configuration is fully validated first, then handed to every
    /// registered validator through [`Validator::reconfigure`]; on error the
    /// old one stays in effect. The cache section cannot change here since
    /// the cache stores are sized at construction.
    pub async fn reload_config(&self, config: EngineConfig) -> Result<()> {
        let plan = TierPlan::build(&config, &self.registry)?;
        let previous = self.snapshot();
        if config.cache != previous.config.cache {
            return Err(EngineError::invalid_config(
                "cache settings cannot change on reload; build a new ValidationCache instead",
            ));
        }

        let validators: Vec<&Arc<dyn Validator>> = self.registry.validators().collect();
        for (idx, validator) in validators.iter().enumerate() {
            if let Err(e) = validator.reconfigure(&config) {
                for applied in &validators[..idx] {
                    if let Err(rollback) = applied.reconfigure(&previous.config) {
                        tracing::warn!(
                            validator = %applied.id(),
                            error = %rollback,
                            "Failed to restore validator configuration"
                        );
                    }
                }
                tracing::warn!(validator = %validator.id(), error = %e, "Rejected configuration reload");
                return Err(e);
            }
        }

        let state = Arc::new(SchedulerState { config, plan });
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
        self.cache.invalidate_all().await;
        tracing::info!("Scheduler configuration reloaded");
        Ok(())
    }

    /// Drop cached outcomes after the truth corpus was replaced
    pub async fn truth_reloaded(&self) {
        self.cache.invalidate_truth().await;
    }

    /// Validate `content` with the `selected` validators
    pub async fn execute(
        &self,
        content: &str,
        document: &DocumentContext,
        selected: &[String],
    ) -> Result<ValidationResult> {
        let started = Instant::now();
        let state = self.snapshot();

        let schedule = match state.plan.schedule(selected) {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::warn!(file = %document.file_path, error = %e, "Rejected validation request");
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejected_run();
                }
                return Err(e);
            }
        };

        if schedule.is_empty() {
            return Ok(ValidationResult::empty());
        }

        let _timer = self.metrics.as_ref().map(|m| m.start_timer());
        let keys = KeyPrefix {
            content: content_fingerprint(content, document),
            selection: selection_fingerprint(selected),
        };
        let content: Arc<str> = Arc::from(content);

        let mut upstream: BTreeMap<String, Outcome> = BTreeMap::new();
        let mut contributions: Vec<Contribution> = Vec::new();
        let mut terminated_after = None;
        let mut tiers_executed = 0;

        for (idx, tier) in schedule.iter().enumerate() {
            let outcomes = self
                .run_tier(tier, &content, document, &upstream, &keys)
                .await;
            tiers_executed += 1;

            for contribution in outcomes {
                upstream.insert(contribution.validator.clone(), contribution.outcome.clone());
                contributions.push(contribution);
            }

            let remaining_tiers = schedule.len() - idx - 1;
            if remaining_tiers > 0 {
                if let Some(trigger) =
                    termination_trigger(&state.config.early_termination, &contributions)
                {
                    tracing::info!(
                        file = %document.file_path,
                        tier = %tier.name,
                        trigger,
                        skipped_tiers = remaining_tiers,
                        "Early termination"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_early_termination(trigger);
                    }
                    terminated_after = Some(tier.name.clone());
                    break;
                }
            }
        }

        let result = aggregate(
            contributions,
            terminated_after,
            tiers_executed,
            schedule.len(),
            started.elapsed(),
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_run(result.is_valid(), result.early_terminated);
            metrics.set_last_confidence(result.confidence);
        }
        tracing::info!(
            request_id = %result.request_id,
            file = %document.file_path,
            issues = result.issues.len(),
            confidence = result.confidence,
            early_terminated = result.early_terminated,
            elapsed_ms = result.duration_ms,
            "Validation run complete"
        );

        Ok(result)
    }

    /// [`execute`](Self::execute), then hand the result to `sink`
    ///
    /// Sink failures are logged and do not affect the returned result.
    pub async fn execute_and_publish(
        &self,
        content: &str,
        document: &DocumentContext,
        selected: &[String],
        sink: &dyn ResultSink,
    ) -> Result<ValidationResult> {
        let result = self.execute(content, document, selected).await?;
        if let Err(e) = sink.publish(document, &result).await {
            tracing::warn!(request_id = %result.request_id, error = %e, "Failed to publish validation result");
        }
        Ok(result)
    }

    async fn run_tier(
        &self,
        tier: &ScheduledTier,
        content: &Arc<str>,
        document: &DocumentContext,
        upstream: &BTreeMap<String, Outcome>,
        keys: &KeyPrefix,
    ) -> Vec<Contribution> {
        let deadline = Instant::now() + tier.timeout;
        let limits = Limits {
            call_timeout: tier.call_timeout,
            tier_timeout: tier.timeout,
            deadline,
        };
        let context =
            ValidationContext::new(document.clone()).with_upstream(Arc::new(upstream.clone()));

        tracing::debug!(
            tier = %tier.name,
            mode = ?tier.mode,
            validators = ?tier.validators,
            "Running tier"
        );

        let mut slots: Vec<Option<Contribution>> = Vec::with_capacity(tier.validators.len());
        let mut pending = Vec::new();

        for (idx, id) in tier.validators.iter().enumerate() {
            let key = keys.outcome_key(id);
            let cached = self.cache.get(&key).await;
            if self.cache.is_enabled() {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_lookup("outcomes", cached.is_some());
                }
            }
            match cached {
                Some(outcome) => {
                    tracing::debug!(validator = %id, tier = %tier.name, "Outcome cache hit");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_validator(id, "cached");
                    }
                    slots.push(Some(Contribution {
                        validator: id.clone(),
                        outcome,
                        source: Source::Cache,
                    }));
                }
                None => {
                    slots.push(None);
                    pending.push((idx, id.clone(), key));
                }
            }
        }

        let results: Vec<(usize, String, OutcomeKey, std::result::Result<Outcome, ValidatorError>)> =
            match tier.mode {
                ExecutionMode::Parallel => {
                    let launched: Vec<_> = pending
                        .into_iter()
                        .map(|(idx, id, key)| {
                            let task = self.launch(&id, content, &context, limits);
                            async move { (idx, id, key, task.await) }
                        })
                        .collect();
                    futures::future::join_all(launched).await
                }
                ExecutionMode::Sequential => {
                    let mut results = Vec::with_capacity(pending.len());
                    for (idx, id, key) in pending {
                        let result = self.launch(&id, content, &context, limits).await;
                        results.push((idx, id, key, result));
                    }
                    results
                }
            };

        for (idx, id, key, result) in results {
            let contribution = match result {
                Ok(outcome) => {
                    if outcome.is_cacheable() {
                        self.cache.set(&key, outcome.clone()).await;
                    } else {
                        tracing::debug!(validator = %id, "Outcome not cached");
                    }
                    self.record_fresh(&id, &outcome);
                    Contribution {
                        validator: id,
                        outcome,
                        source: Source::Executed,
                    }
                }
                Err(e) => {
                    tracing::warn!(validator = %id, tier = %tier.name, error = %e, "Validator failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_validator(&id, "failed");
                    }
                    Contribution {
                        outcome: failure_outcome(&id, &e),
                        validator: id,
                        source: Source::Failed,
                    }
                }
            };
            slots[idx] = Some(contribution);
        }

        slots.into_iter().flatten().collect()
    }

    /// Start one validator and resolve to its bounded result
    fn launch(
        &self,
        id: &str,
        content: &Arc<str>,
        context: &ValidationContext,
        limits: Limits,
    ) -> impl std::future::Future<Output = std::result::Result<Outcome, ValidatorError>> {
        let validator = self.registry.get(id);
        let handle = validator.map(|v| spawn_validator(v, Arc::clone(content), context.clone(), limits));
        let id = id.to_string();

        async move {
            match handle {
                Some(handle) => join_validator(handle, limits).await,
                // Unreachable once the plan is built against the registry.
                None => Err(ValidatorError::failed(format!("validator '{}' is not registered", id))),
            }
        }
    }

    fn record_fresh(&self, id: &str, outcome: &Outcome) {
        tracing::debug!(
            validator = %id,
            issues = outcome.issues.len(),
            confidence = outcome.confidence,
            "Validator finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_validator(id, "ok");
            if let Some(reason) = outcome.metrics.get("skip_reason").and_then(|v| v.as_str()) {
                metrics.record_semantic_skip(reason);
            }
        }
    }
}

struct KeyPrefix {
    content: String,
    selection: String,
}

impl KeyPrefix {
    fn outcome_key(&self, validator_id: &str) -> OutcomeKey {
        OutcomeKey::new(&self.content, &self.selection, validator_id)
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    call_timeout: Duration,
    tier_timeout: Duration,
    deadline: Instant,
}

impl Limits {
    /// Time budget for a call starting now, and the limit reported on timeout
    fn budget(&self) -> (Duration, u64) {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if self.call_timeout <= remaining {
            (self.call_timeout, self.call_timeout.as_millis() as u64)
        } else {
            (remaining, self.tier_timeout.as_millis() as u64)
        }
    }
}

fn spawn_validator(
    validator: Arc<dyn Validator>,
    content: Arc<str>,
    context: ValidationContext,
    limits: Limits,
) -> JoinHandle<std::result::Result<Outcome, ValidatorError>> {
    tokio::spawn(async move {
        let (budget, limit_ms) = limits.budget();
        if budget.is_zero() {
            return Err(ValidatorError::Timeout(limit_ms));
        }
        // The validator sees the same deadline the timeout below enforces.
        let context = context.with_deadline(Instant::now() + budget);
        match timeout(budget, validator.validate(&content, &context)).await {
            Ok(Ok(outcome)) => outcome
                .check_well_formed()
                .map(|_| outcome)
                .map_err(ValidatorError::MalformedOutcome),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ValidatorError::Timeout(limit_ms)),
        }
    })
}

async fn join_validator(
    mut handle: JoinHandle<std::result::Result<Outcome, ValidatorError>>,
    limits: Limits,
) -> std::result::Result<Outcome, ValidatorError> {
    match timeout_at(limits.deadline + ABORT_GRACE, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => {
            let panic = join_error.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ValidatorError::failed(format!("panicked: {}", message)))
        }
        Ok(Err(_)) => Err(ValidatorError::failed("task was cancelled")),
        Err(_) => {
            handle.abort();
            Err(ValidatorError::Timeout(limits.tier_timeout.as_millis() as u64))
        }
    }
}

/// The single synthetic issue standing in for a failed validator
fn failure_outcome(validator_id: &str, error: &ValidatorError) -> Outcome {
    let issue = Issue::builder(validator_id, error.code(), category::VALIDATOR_INTERNAL)
        .level(Severity::Error)
        .subcategory(validator_id)
        .build(format!("Validator '{}' did not complete: {}", validator_id, error));
    Outcome::new(vec![issue], 0.0).with_metric("failure", json!(error.code()))
}

fn termination_trigger(
    policy: &EarlyTerminationConfig,
    contributions: &[Contribution],
) -> Option<&'static str> {
    let issues = || contributions.iter().flat_map(|c| c.outcome.issues.iter());

    if policy.on_critical && issues().any(|i| i.level == Severity::Critical) {
        return Some("critical");
    }
    if let Some(threshold) = policy.error_threshold {
        if issues().filter(|i| i.is_blocking()).count() >= threshold {
            return Some("error_threshold");
        }
    }
    None
}

fn aggregate(
    contributions: Vec<Contribution>,
    terminated_after: Option<String>,
    tiers_executed: usize,
    tiers_scheduled: usize,
    elapsed: Duration,
) -> ValidationResult {
    let confidence = contributions
        .iter()
        .map(|c| c.outcome.confidence)
        .fold(1.0_f64, f64::min);

    let count = |source: Source| contributions.iter().filter(|c| c.source == source).count();
    let executed = count(Source::Executed) + count(Source::Failed);
    let cache_hits = count(Source::Cache);
    let failures = count(Source::Failed);

    let per_validator: BTreeMap<&str, serde_json::Value> = contributions
        .iter()
        .map(|c| {
            (
                c.validator.as_str(),
                json!({
                    "issues": c.outcome.issues.len(),
                    "confidence": c.outcome.confidence,
                    "cached": c.source == Source::Cache,
                }),
            )
        })
        .collect();

    let mut metrics = BTreeMap::new();
    metrics.insert("validators_executed".to_string(), json!(executed));
    metrics.insert("cache_hits".to_string(), json!(cache_hits));
    metrics.insert("validator_failures".to_string(), json!(failures));
    metrics.insert("tiers_executed".to_string(), json!(tiers_executed));
    metrics.insert(
        "tiers_skipped".to_string(),
        json!(tiers_scheduled - tiers_executed),
    );
    metrics.insert("outcomes".to_string(), json!(per_validator));

    let validators = contributions.iter().map(|c| c.validator.clone()).collect();
    let issues = contributions
        .into_iter()
        .flat_map(|c| c.outcome.issues)
        .collect();

    ValidationResult {
        request_id: Uuid::new_v4(),
        issues,
        confidence,
        early_terminated: terminated_after.is_some(),
        terminated_after,
        validators,
        metrics,
        duration_ms: elapsed.as_millis() as u64,
    }
}
