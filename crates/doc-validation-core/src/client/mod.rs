//! Semantic enhancement backends
//!
//! The truth validator talks to a model-backed service through
//! [`SemanticBackend`]. [`HttpSemanticBackend`] calls a remote service over
//! HTTP; [`StaticSemanticBackend`] returns a fixed response and is meant for
//! tests and offline runs.

pub mod semantic;

pub use semantic::{HttpSemanticBackend, HttpSemanticBackendBuilder, HttpSemanticBackendConfig};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::contracts::{SemanticPrompt, SemanticResponse};
use crate::error::EnhancerError;

/// A model-backed service that reviews documents against truth context
#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Review one prompt; `timeout` bounds the whole call
    async fn enhance(
        &self,
        prompt: &SemanticPrompt,
        timeout: Duration,
    ) -> Result<SemanticResponse, EnhancerError>;
}

/// Backend returning a canned response after an optional delay
#[derive(Debug)]
pub struct StaticSemanticBackend {
    result: Result<SemanticResponse, EnhancerError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticSemanticBackend {
    pub fn new(response: SemanticResponse) -> Self {
        Self {
            result: Ok(response),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// A backend that always fails with `error`
    pub fn failing(error: EnhancerError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticBackend for StaticSemanticBackend {
    fn name(&self) -> &str {
        "static"
    }

    async fn enhance(
        &self,
        _prompt: &SemanticPrompt,
        _timeout: Duration,
    ) -> Result<SemanticResponse, EnhancerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}
