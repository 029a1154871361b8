//! Extraction provider port - one independent entity extraction attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::models::RawCandidate;
use crate::domain::ports::errors::ProviderError;

/// Source material handed to every extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionInput {
    pub text: String,
    pub source_name: Option<String>,
}

impl ExtractionInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_name: None,
        }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }
}

#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Run one extraction attempt. Attempts must not share state.
    async fn extract_once(&self, input: &ExtractionInput) -> Result<Vec<RawCandidate>, ProviderError>;
}
