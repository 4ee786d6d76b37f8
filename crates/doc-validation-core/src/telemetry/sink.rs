//! Result sinks
//!
//! The scheduler hands every finished [`ValidationResult`] to a sink through
//! `execute_and_publish`. Sink failures are logged by the caller and never
//! change the result.

use async_trait::async_trait;
use std::sync::Mutex;

use super::Result;
use crate::contracts::{DocumentContext, Severity, ValidationResult};

/// Destination for finished validation results
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, document: &DocumentContext, result: &ValidationResult) -> Result<()>;
}

/// Logs a one-line summary per result and one line per blocking issue
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ResultSink for TracingSink {
    async fn publish(&self, document: &DocumentContext, result: &ValidationResult) -> Result<()> {
        tracing::info!(
            request_id = %result.request_id,
            file = %document.file_path,
            issues = result.issues.len(),
            critical = result.count_at(Severity::Critical),
            errors = result.count_at(Severity::Error),
            confidence = result.confidence,
            early_terminated = result.early_terminated,
            duration_ms = result.duration_ms,
            "Validation finished"
        );

        for issue in result.issues.iter().filter(|i| i.is_blocking()) {
            tracing::warn!(
                request_id = %result.request_id,
                file = %document.file_path,
                code = %issue.code,
                provenance = %issue.provenance,
                "{}",
                issue
            );
        }
        Ok(())
    }
}

/// Keeps published results in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<(DocumentContext, ValidationResult)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<(DocumentContext, ValidationResult)> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.results().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn publish(&self, document: &DocumentContext, result: &ValidationResult) -> Result<()> {
        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((document.clone(), result.clone()));
        Ok(())
    }
}
