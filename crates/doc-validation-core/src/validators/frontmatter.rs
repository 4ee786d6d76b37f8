//! Frontmatter structure validator
//!
//! Checks that a document carries a terminated, parseable YAML frontmatter
//! block and that the configured keys are present and non-empty.

use async_trait::async_trait;
use serde_yaml::Value;
use std::sync::{PoisonError, RwLock};

use super::{ValidationContext, Validator};
use crate::config::{EngineConfig, FrontmatterConfig};
use crate::contracts::{category, Issue, Location, Outcome, Severity};
use crate::document::SplitDocument;
use crate::error::{EngineError, ValidatorError};

pub const VALIDATOR_ID: &str = "frontmatter";

/// Validates frontmatter presence, syntax and required keys
///
/// Required keys are chosen by the document's profile.
#[derive(Debug)]
pub struct FrontmatterValidator {
    config: RwLock<FrontmatterConfig>,
}

impl Default for FrontmatterValidator {
    fn default() -> Self {
        Self::new(FrontmatterConfig::default())
    }
}

impl FrontmatterValidator {
    pub fn new(config: FrontmatterConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    fn issue(code: &str) -> crate::contracts::IssueBuilder {
        Issue::builder(VALIDATOR_ID, code, category::FRONTMATTER)
    }

    fn check(content: &str, required_keys: &[String]) -> Vec<Issue> {
        let doc = SplitDocument::parse(content);

        if doc.unterminated {
            return vec![Self::issue("FM_UNTERMINATED")
                .level(Severity::Error)
                .location(Location::line(1))
                .suggestion("Close the frontmatter block with a line containing only '---'")
                .build("Frontmatter block is opened but never closed")];
        }

        let mapping = match doc.mapping() {
            Ok(Some(mapping)) => mapping,
            Ok(None) => {
                return vec![Self::issue("FM_MISSING")
                    .level(Severity::Warning)
                    .location(Location::line(1))
                    .fix_example("---\ntitle: My page\n---")
                    .build("Document has no frontmatter")];
            }
            Err(e) => {
                let line = e.location().map(|l| l.line() + 1).unwrap_or(1);
                return vec![Self::issue("FM_INVALID_YAML")
                    .level(Severity::Error)
                    .location(Location::line(line))
                    .build(format!("Frontmatter is not valid YAML: {}", e))];
            }
        };

        let mut issues = Vec::new();
        for key in required_keys {
            match mapping.get(key.as_str()) {
                None => issues.push(
                    Self::issue("FM_MISSING_KEY")
                        .level(Severity::Error)
                        .location(Location::line(1).with_section(key.clone()))
                        .build(format!("Required frontmatter key '{}' is missing", key)),
                ),
                Some(value) if is_empty(value) => issues.push(
                    Self::issue("FM_EMPTY_KEY")
                        .level(Severity::Warning)
                        .location(Location::line(1).with_section(key.clone()))
                        .build(format!("Frontmatter key '{}' is empty", key)),
                ),
                Some(_) => {}
            }
        }
        issues
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Sequence(items) => items.is_empty(),
        Value::Mapping(map) => map.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl Validator for FrontmatterValidator {
    fn id(&self) -> &str {
        VALIDATOR_ID
    }

    fn description(&self) -> &str {
        "Frontmatter presence, YAML syntax and required keys"
    }

    fn reconfigure(&self, config: &EngineConfig) -> Result<(), EngineError> {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config.frontmatter.clone();
        Ok(())
    }

    async fn validate(
        &self,
        content: &str,
        context: &ValidationContext,
    ) -> Result<Outcome, ValidatorError> {
        let issues = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            Self::check(content, config.required_for(&context.document.profile))
        };
        let count = issues.len();
        Ok(Outcome::new(issues, 1.0).with_metric("issues", serde_json::json!(count)))
    }
}
