//! Prometheus metrics for the validation engine
//!
//! - `runs_total` (counter) - scheduler runs by outcome
//! - `run_duration_seconds` (histogram) - end-to-end run duration
//! - `validator_executions_total` (counter) - validator invocations by result
//! - `cache_lookups_total` (counter) - cache lookups by store and result
//! - `semantic_skips_total` (counter) - degraded semantic phases by reason
//! - `early_terminations_total` (counter) - runs stopped before the last tier
//! - `last_confidence` (gauge) - confidence of the most recent run
//!
//! All metrics live in the `doc_validation` namespace.

use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;
use std::time::Instant;

use super::{Result, TelemetryError};

const NAMESPACE: &str = "doc_validation";

/// Engine metrics
pub struct EngineMetrics {
    runs_total: CounterVec,
    run_duration_seconds: Histogram,
    validator_executions_total: CounterVec,
    cache_lookups_total: CounterVec,
    semantic_skips_total: CounterVec,
    early_terminations_total: CounterVec,
    last_confidence: Gauge,
}

impl EngineMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let runs_total = CounterVec::new(
            Opts::new("runs_total", "Total number of validation runs").namespace(NAMESPACE),
            &["outcome"],
        )?;

        let run_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("run_duration_seconds", "Validation run duration in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        let validator_executions_total = CounterVec::new(
            Opts::new(
                "validator_executions_total",
                "Validator invocations by validator and result",
            )
            .namespace(NAMESPACE),
            &["validator", "result"],
        )?;

        let cache_lookups_total = CounterVec::new(
            Opts::new("cache_lookups_total", "Cache lookups by store and result")
                .namespace(NAMESPACE),
            &["store", "result"],
        )?;

        let semantic_skips_total = CounterVec::new(
            Opts::new(
                "semantic_skips_total",
                "Semantic enhancement phases skipped, by reason",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;

        let early_terminations_total = CounterVec::new(
            Opts::new(
                "early_terminations_total",
                "Runs stopped before the final tier, by trigger",
            )
            .namespace(NAMESPACE),
            &["trigger"],
        )?;

        let last_confidence = Gauge::with_opts(
            Opts::new("last_confidence", "Confidence of the most recent run (0.0 - 1.0)")
                .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;
        registry.register(Box::new(validator_executions_total.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(semantic_skips_total.clone()))?;
        registry.register(Box::new(early_terminations_total.clone()))?;
        registry.register(Box::new(last_confidence.clone()))?;

        Ok(Self {
            runs_total,
            run_duration_seconds,
            validator_executions_total,
            cache_lookups_total,
            semantic_skips_total,
            early_terminations_total,
            last_confidence,
        })
    }

    /// Record a finished run
    pub fn record_run(&self, valid: bool, early_terminated: bool) {
        let outcome = match (valid, early_terminated) {
            (_, true) => "terminated",
            (true, false) => "valid",
            (false, false) => "invalid",
        };
        self.runs_total.with_label_values(&[outcome]).inc();
    }

    /// Record a run rejected because of a configuration error
    pub fn record_rejected_run(&self) {
        self.runs_total.with_label_values(&["rejected"]).inc();
    }

    pub fn observe_duration(&self, duration_secs: f64) {
        self.run_duration_seconds.observe(duration_secs);
    }

    /// Record a validator invocation; `result` is `ok`, `failed` or `cached`
    pub fn record_validator(&self, validator: &str, result: &str) {
        self.validator_executions_total
            .with_label_values(&[validator, result])
            .inc();
    }

    pub fn record_cache_lookup(&self, store: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .with_label_values(&[store, result])
            .inc();
    }

    pub fn record_semantic_skip(&self, reason: &str) {
        self.semantic_skips_total.with_label_values(&[reason]).inc();
    }

    pub fn record_early_termination(&self, trigger: &str) {
        self.early_terminations_total
            .with_label_values(&[trigger])
            .inc();
    }

    pub fn set_last_confidence(&self, confidence: f64) {
        self.last_confidence.set(confidence);
    }

    /// Start a run timer (records the duration on drop)
    pub fn start_timer(&self) -> RunTimer<'_> {
        RunTimer {
            start: Instant::now(),
            metrics: self,
        }
    }
}

/// RAII guard timing one run
pub struct RunTimer<'a> {
    start: Instant,
    metrics: &'a EngineMetrics,
}

impl<'a> RunTimer<'a> {
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl<'a> Drop for RunTimer<'a> {
    fn drop(&mut self) {
        self.metrics
            .observe_duration(self.start.elapsed().as_secs_f64());
    }
}

/// Registry owning the engine metrics
pub struct EngineMetricsRegistry {
    registry: Arc<Registry>,
    engine: Arc<EngineMetrics>,
}

impl EngineMetricsRegistry {
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Register into an existing Prometheus registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let engine = Arc::new(EngineMetrics::new(Arc::clone(&registry))?);
        Ok(Self { registry, engine })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Shared handle for the scheduler
    pub fn engine(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.engine)
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Encode metrics as text for scraping
    pub fn encode_text(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| TelemetryError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
