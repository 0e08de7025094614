use std::sync::Arc;

use tracing::info;

use super::{
    AzureEmbeddingBackend, EmbeddingBackend, EmbeddingError, EmbeddingResult,
    GeminiEmbeddingBackend, LocalEmbeddingBackend,
};
use crate::core::config::{Credentials, EmbeddingProviderKind, EmbeddingSettings};
use crate::core::http::build_client;
use crate::llm::EndpointDirectory;

/// Builds the configured backend. `directory` is required for `openai`.
pub fn create_backend(
    settings: &EmbeddingSettings,
    credentials: &Credentials,
    directory: Option<Arc<EndpointDirectory>>,
) -> EmbeddingResult<Arc<dyn EmbeddingBackend>> {
    let client = build_client(settings.timeout)
        .map_err(|e| EmbeddingError::Config(format!("failed to build HTTP client: {}", e)))?;

    info!(
        "Creating {} embedding backend: model={}, dimensions={}",
        settings.provider, settings.model, settings.dimensions
    );

    let backend: Arc<dyn EmbeddingBackend> = match settings.provider {
        EmbeddingProviderKind::Local => Arc::new(LocalEmbeddingBackend::new(
            client,
            settings.endpoint.clone(),
            settings.model.clone(),
            settings.dimensions,
            settings.query_instruction.clone(),
            settings.batch_size,
        )),
        EmbeddingProviderKind::OpenAi => {
            let api_key = credentials
                .azure_openai_api_key
                .clone()
                .ok_or_else(|| EmbeddingError::Config("missing Azure OpenAI key".to_string()))?;
            let directory = directory.ok_or_else(|| {
                EmbeddingError::Config("openai embeddings need an endpoint directory".to_string())
            })?;
            Arc::new(AzureEmbeddingBackend::new(
                client,
                directory,
                api_key,
                settings.api_version.clone(),
                settings.model.clone(),
                settings.dimensions,
                settings.batch_size,
            ))
        }
        EmbeddingProviderKind::Gemini => {
            let api_key = credentials
                .google_api_key
                .clone()
                .ok_or_else(|| EmbeddingError::Config("missing Google API key".to_string()))?;
            Arc::new(GeminiEmbeddingBackend::new(
                client,
                settings.endpoint.clone(),
                api_key,
                settings.model.clone(),
                settings.dimensions,
                settings.batch_size,
            ))
        }
    };

    Ok(backend)
}
