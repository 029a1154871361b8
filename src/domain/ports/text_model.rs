//! Text model port - a plain prompt-in, text-out language model.

use async_trait::async_trait;

use crate::domain::ports::errors::ProviderError;

#[async_trait]
pub trait TextModel: Send + Sync {
    /// Model identifier used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}
