//! Error types for the validation engine
//!
//! Only [`EngineError`] crosses the `execute` boundary, and every variant of it
//! is a configuration error: fatal, reported immediately and never retried.
//! Validator, enhancer and cache failures have their own types so they can be
//! absorbed where they happen.

use thiserror::Error;

/// Configuration errors surfaced to callers of the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// A tier or request names a validator that is not registered
    #[error("Unknown validator: {0}")]
    UnknownValidator(String),

    /// A validator appears in more than one tier slot
    #[error("Validator declared more than once: {0}")]
    DuplicateValidator(String),

    /// Validator dependencies form a cycle
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    /// A dependency can never produce an outcome before its dependent runs
    #[error("Validator '{validator}' depends on '{dependency}', which is not resolved by the final tier")]
    UnresolvedDependency { validator: String, dependency: String },

    /// A tier definition is structurally invalid
    #[error("Malformed tier '{tier}': {reason}")]
    MalformedTier { tier: String, reason: String },

    /// Any other invalid setting
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration source could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),
}

impl EngineError {
    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        EngineError::InvalidConfig(msg.into())
    }

    /// Create a malformed tier error
    pub fn malformed_tier(tier: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedTier {
            tier: tier.into(),
            reason: reason.into(),
        }
    }

    /// The validator id this error is about, if any
    pub fn offending_id(&self) -> Option<&str> {
        match self {
            EngineError::UnknownValidator(id) | EngineError::DuplicateValidator(id) => Some(id),
            EngineError::UnresolvedDependency { validator, .. } => Some(validator),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoad(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ConfigLoad(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::ConfigLoad(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoad(format!("TOML error: {}", err))
    }
}

impl From<regex::Error> for EngineError {
    fn from(err: regex::Error) -> Self {
        EngineError::InvalidConfig(format!("invalid pattern: {}", err))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure of a single validator invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidatorError {
    #[error("Validator failed: {0}")]
    Failed(String),

    #[error("Validator returned a malformed outcome: {0}")]
    MalformedOutcome(String),

    #[error("Validator timed out after {0}ms")]
    Timeout(u64),
}

impl ValidatorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ValidatorError::Failed(msg.into())
    }

    /// Machine code used for the synthetic issue
    pub fn code(&self) -> &'static str {
        match self {
            ValidatorError::Failed(_) => "VALIDATOR_FAILED",
            ValidatorError::MalformedOutcome(_) => "VALIDATOR_MALFORMED_OUTCOME",
            ValidatorError::Timeout(_) => "VALIDATOR_TIMEOUT",
        }
    }
}

/// Failure of the semantic enhancer backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnhancerError {
    #[error("Semantic enhancer timed out after {0}ms")]
    Timeout(u64),

    #[error("Semantic service error: {0}")]
    Service(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Invalid semantic response: {0}")]
    InvalidResponse(String),
}

/// Failure of a cache store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),
}
