use async_trait::async_trait;

use super::error::{GenerationFailure, ProviderError};
use super::types::{CompletionRequest, Endpoint};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name (e.g. "openai", "gemini")
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// ordered candidate endpoints for the next call
    async fn endpoints(&self) -> Result<Vec<Endpoint>, ProviderError>;

    /// one completion attempt against one endpoint, returning raw text
    async fn complete(
        &self,
        endpoint: &Endpoint,
        request: &CompletionRequest,
    ) -> Result<String, ProviderError>;
}

/// Prompt in, raw model text out, with retries handled inside.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_retries: usize,
    ) -> Result<String, GenerationFailure>;
}
