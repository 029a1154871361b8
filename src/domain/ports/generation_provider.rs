//! Generation provider port - produces text for one record field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::models::FieldSpec;
use crate::domain::ports::errors::ProviderError;

/// Context shared by every field generation in a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationContext {
    /// Excerpt of the source material
    pub source_excerpt: Option<String>,
    /// Previously settled values, keyed by field key
    pub facts: BTreeMap<String, String>,
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, excerpt: impl Into<String>) -> Self {
        self.source_excerpt = Some(excerpt.into());
        self
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate_field(
        &self,
        spec: &FieldSpec,
        context: &GenerationContext,
    ) -> Result<String, ProviderError>;
}
