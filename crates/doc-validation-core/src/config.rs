//! Engine configuration
//!
//! Tier layout, dependency declarations, timeouts, cache TTLs and truth
//! validation policy. Loaded once at startup from YAML, TOML or JSON and
//! explicitly reloadable through the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::contracts::Severity;
use crate::error::{EngineError, Result};

/// How the validators of a tier are launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// All cache misses fan out concurrently
    #[default]
    Parallel,
    /// One validator at a time in declared order
    Sequential,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// A named, ordered group of validators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Wall-clock budget for the whole tier
    #[serde(default = "default_tier_timeout_ms")]
    pub timeout_ms: u64,
    /// Budget for each validator call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    pub validators: Vec<String>,
    /// Validator id -> ids whose outcomes it needs first
    #[serde(default)]
    pub depends_on: BTreeMap<String, Vec<String>>,
}

fn default_tier_timeout_ms() -> u64 {
    30_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

impl TierConfig {
    pub fn new(name: impl Into<String>, mode: ExecutionMode, validators: &[&str]) -> Self {
        Self {
            name: name.into(),
            mode,
            timeout_ms: default_tier_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            validators: validators.iter().map(|v| v.to_string()).collect(),
            depends_on: BTreeMap::new(),
        }
    }

    pub fn parallel(name: impl Into<String>, validators: &[&str]) -> Self {
        Self::new(name, ExecutionMode::Parallel, validators)
    }

    pub fn sequential(name: impl Into<String>, validators: &[&str]) -> Self {
        Self::new(name, ExecutionMode::Sequential, validators)
    }

    pub fn with_dependency(mut self, validator: &str, dependency: &str) -> Self {
        self.depends_on
            .entry(validator.to_string())
            .or_default()
            .push(dependency.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_call_timeout_ms(mut self, call_timeout_ms: u64) -> Self {
        self.call_timeout_ms = call_timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Between-tier stopping policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyTerminationConfig {
    /// Stop once any collected issue is critical
    #[serde(default = "default_true")]
    pub on_critical: bool,
    /// Stop once the cumulative error count reaches this value
    #[serde(default)]
    pub error_threshold: Option<usize>,
}

impl Default for EarlyTerminationConfig {
    fn default() -> Self {
        Self {
            on_critical: true,
            error_threshold: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Settings for the two cache stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_outcome_ttl_secs")]
    pub outcome_ttl_secs: u64,
    #[serde(default = "default_outcome_capacity")]
    pub outcome_capacity: usize,
    #[serde(default = "default_response_ttl_secs")]
    pub response_ttl_secs: u64,
    #[serde(default = "default_response_capacity")]
    pub response_capacity: usize,
}

fn default_outcome_ttl_secs() -> u64 {
    300
}

fn default_outcome_capacity() -> usize {
    1024
}

fn default_response_ttl_secs() -> u64 {
    86_400
}

fn default_response_capacity() -> usize {
    4096
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outcome_ttl_secs: default_outcome_ttl_secs(),
            outcome_capacity: default_outcome_capacity(),
            response_ttl_secs: default_response_ttl_secs(),
            response_capacity: default_response_capacity(),
        }
    }
}

/// A pattern that must not appear in documentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenPattern {
    pub code: String,
    pub pattern: String,
    pub message: String,
    #[serde(default)]
    pub level: Severity,
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Rule-based phase settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthRulesConfig {
    /// Regexes with a named `id` group locating capability references in prose
    #[serde(default = "default_reference_patterns")]
    pub reference_patterns: Vec<String>,
    /// Frontmatter keys listing capability ids directly
    #[serde(default = "default_reference_keys")]
    pub reference_keys: Vec<String>,
    /// Frontmatter keys that must be present
    #[serde(default)]
    pub required_frontmatter: Vec<String>,
    #[serde(default)]
    pub forbidden_patterns: Vec<ForbiddenPattern>,
}

fn default_reference_patterns() -> Vec<String> {
    vec![
        r"(?i)\b(?:uses?|using|requires?|with)\s+(?:the\s+)?(?:plugin|capability|feature)\s+`?(?P<id>[A-Za-z0-9](?:[A-Za-z0-9_.\-]*[A-Za-z0-9])?)`?"
            .to_string(),
    ]
}

fn default_reference_keys() -> Vec<String> {
    vec!["plugins".to_string(), "capabilities".to_string()]
}

impl Default for TruthRulesConfig {
    fn default() -> Self {
        Self {
            reference_patterns: default_reference_patterns(),
            reference_keys: default_reference_keys(),
            required_frontmatter: Vec::new(),
            forbidden_patterns: Vec::new(),
        }
    }
}

/// Semantic enhancement settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_content_len")]
    pub min_content_len: usize,
    #[serde(default = "default_max_content_len")]
    pub max_content_len: usize,
    #[serde(default = "default_semantic_timeout_ms")]
    pub timeout_ms: u64,
    /// Semantic findings below this confidence are dropped
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Corpus entries included in the prompt
    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,
    /// Time kept back from the tier deadline so the rule-based result can
    /// still be returned when the tier budget runs out mid-call
    #[serde(default = "default_timeout_reserve_ms")]
    pub timeout_reserve_ms: u64,
}

fn default_min_content_len() -> usize {
    200
}

fn default_max_content_len() -> usize {
    50_000
}

fn default_semantic_timeout_ms() -> u64 {
    5_000
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_context_top_k() -> usize {
    5
}

fn default_timeout_reserve_ms() -> u64 {
    25
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_content_len: default_min_content_len(),
            max_content_len: default_max_content_len(),
            timeout_ms: default_semantic_timeout_ms(),
            confidence_threshold: default_confidence_threshold(),
            context_top_k: default_context_top_k(),
            timeout_reserve_ms: default_timeout_reserve_ms(),
        }
    }
}

impl SemanticConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn timeout_reserve(&self) -> Duration {
        Duration::from_millis(self.timeout_reserve_ms)
    }
}

/// Per-level weights used by the truth confidence formula
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    pub critical: f64,
    pub error: f64,
    pub warning: f64,
    pub info: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: 1.0,
            error: 0.6,
            warning: 0.3,
            info: 0.1,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, level: Severity) -> f64 {
        match level {
            Severity::Critical => self.critical,
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }

    fn all(&self) -> [f64; 4] {
        [self.critical, self.error, self.warning, self.info]
    }
}

/// Merge policy for the truth pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Number of normalised message characters in a dedup signature
    #[serde(default = "default_message_prefix_len")]
    pub message_prefix_len: usize,
    #[serde(default)]
    pub severity_weights: SeverityWeights,
}

fn default_message_prefix_len() -> usize {
    50
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            message_prefix_len: default_message_prefix_len(),
            severity_weights: SeverityWeights::default(),
        }
    }
}

/// Keys the frontmatter validator requires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontmatterConfig {
    /// Keys required of documents whose profile has no entry in `profiles`
    #[serde(default = "default_required_keys")]
    pub required_keys: Vec<String>,
    /// Per-profile key lists; an entry replaces `required_keys`
    #[serde(default)]
    pub profiles: BTreeMap<String, Vec<String>>,
}

fn default_required_keys() -> Vec<String> {
    vec!["title".to_string()]
}

impl Default for FrontmatterConfig {
    fn default() -> Self {
        Self {
            required_keys: default_required_keys(),
            profiles: BTreeMap::new(),
        }
    }
}

impl FrontmatterConfig {
    pub fn with_profile(mut self, profile: impl Into<String>, keys: &[&str]) -> Self {
        self.profiles
            .insert(profile.into(), keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Keys required of a document with the given profile
    pub fn required_for(&self, profile: &str) -> &[String] {
        self.profiles
            .get(profile)
            .unwrap_or(&self.required_keys)
    }
}

/// Truth validation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TruthConfig {
    #[serde(default)]
    pub rules: TruthRulesConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub early_termination: EarlyTerminationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub frontmatter: FrontmatterConfig,
    #[serde(default)]
    pub truth: TruthConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierConfig::parallel("structure", &["frontmatter", "fuzzy"]),
                TierConfig::sequential("truth", &["truth"]).with_dependency("truth", "fuzzy"),
            ],
            early_termination: EarlyTerminationConfig::default(),
            cache: CacheConfig::default(),
            frontmatter: FrontmatterConfig::default(),
            truth: TruthConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with the given tiers and default policies
    pub fn with_tiers(tiers: Vec<TierConfig>) -> Self {
        Self {
            tiers,
            ..Default::default()
        }
    }

    /// Load from a file, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content),
            "toml" => Self::from_toml_str(&content),
            "json" => Self::from_json_str(&content),
            other => Err(EngineError::ConfigLoad(format!(
                "unsupported configuration format '{}' for {}",
                other,
                path.display()
            ))),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOCVAL_*` environment variable overrides
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<bool>("DOCVAL_CACHE_ENABLED") {
            self.cache.enabled = v;
        }
        if let Some(v) = env_parse::<u64>("DOCVAL_OUTCOME_TTL_SECS") {
            self.cache.outcome_ttl_secs = v;
        }
        if let Some(v) = env_parse::<u64>("DOCVAL_RESPONSE_TTL_SECS") {
            self.cache.response_ttl_secs = v;
        }
        if let Some(v) = env_parse::<bool>("DOCVAL_SEMANTIC_ENABLED") {
            self.truth.semantic.enabled = v;
        }
        if let Some(v) = env_parse::<u64>("DOCVAL_SEMANTIC_TIMEOUT_MS") {
            self.truth.semantic.timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("DOCVAL_ERROR_THRESHOLD") {
            self.early_termination.error_threshold = Some(v);
        }
        self
    }

    /// Structural validation; dependency resolution happens when the tier
    /// plan is built against a validator registry.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for tier in &self.tiers {
            if tier.name.trim().is_empty() {
                return Err(EngineError::malformed_tier("", "tier name must not be empty"));
            }
            if !names.insert(tier.name.as_str()) {
                return Err(EngineError::malformed_tier(&tier.name, "duplicate tier name"));
            }
            if tier.timeout_ms == 0 {
                return Err(EngineError::malformed_tier(&tier.name, "timeout_ms must be positive"));
            }
            if tier.call_timeout_ms == 0 {
                return Err(EngineError::malformed_tier(
                    &tier.name,
                    "call_timeout_ms must be positive",
                ));
            }
            for id in tier.depends_on.keys() {
                if !tier.validators.contains(id) {
                    return Err(EngineError::malformed_tier(
                        &tier.name,
                        format!("dependencies declared for '{}', which is not in this tier", id),
                    ));
                }
            }
        }

        let frontmatter = &self.frontmatter;
        if frontmatter
            .required_keys
            .iter()
            .chain(frontmatter.profiles.values().flatten())
            .any(|key| key.trim().is_empty())
        {
            return Err(EngineError::invalid_config(
                "frontmatter required keys must not be empty",
            ));
        }

        let semantic = &self.truth.semantic;
        if !(0.0..=1.0).contains(&semantic.confidence_threshold) {
            return Err(EngineError::invalid_config(
                "truth.semantic.confidence_threshold must be within [0, 1]",
            ));
        }
        if semantic.min_content_len > semantic.max_content_len {
            return Err(EngineError::invalid_config(
                "truth.semantic.min_content_len exceeds max_content_len",
            ));
        }
        if semantic.timeout_ms == 0 {
            return Err(EngineError::invalid_config(
                "truth.semantic.timeout_ms must be positive",
            ));
        }
        if self
            .truth
            .merge
            .severity_weights
            .all()
            .iter()
            .any(|w| !(0.0..=1.0).contains(w))
        {
            return Err(EngineError::invalid_config(
                "truth.merge.severity_weights must be within [0, 1]",
            ));
        }
        if self.cache.outcome_capacity == 0 || self.cache.response_capacity == 0 {
            return Err(EngineError::invalid_config("cache capacities must be positive"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
