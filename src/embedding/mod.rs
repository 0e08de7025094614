//! Text embedding backends.
//!
//! Every backend maps text into a fixed-length vector space. Documents are
//! embedded in batches at index-build time; queries one at a time per search.

pub mod azure;
pub mod factory;
pub mod gemini;
pub mod local;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::llm::ProviderError;

pub use azure::AzureEmbeddingBackend;
pub use factory::create_backend;
pub use gemini::GeminiEmbeddingBackend;
pub use local::LocalEmbeddingBackend;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("embedding provider unavailable: {0}")]
    Transient(String),
    #[error("embedding request rejected: {0}")]
    Fatal(String),
    #[error("unexpected embedding response: {0}")]
    Malformed(String),
    #[error("embedding configuration error: {0}")]
    Config(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

impl From<ProviderError> for EmbeddingError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(msg) => EmbeddingError::Transient(msg),
            ProviderError::Fatal(msg) => EmbeddingError::Fatal(msg),
        }
    }
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// provider tag recorded in the index manifest ("local", "openai", "gemini")
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embeds documents, one vector per input in input order.
    async fn encode_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Embeds a search query into the same space as `encode_batch`.
    async fn encode_query(&self, text: &str) -> EmbeddingResult<Vec<f32>>;
}

pub(crate) fn ensure_non_empty<'a>(texts: impl IntoIterator<Item = &'a str>) -> EmbeddingResult<()> {
    if texts.into_iter().any(|text| text.trim().is_empty()) {
        return Err(EmbeddingError::EmptyInput);
    }
    Ok(())
}

/// Checks the 1:1 text-to-vector contract and the configured width.
pub(crate) fn check_vectors(
    expected: usize,
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
) -> EmbeddingResult<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} dimensions, got {}",
            dimensions,
            bad.len()
        )));
    }
    Ok(vectors)
}

/// OpenAI-style `{"data": [{"embedding": [...], "index": n}]}` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAiEmbeddingResponse {
    /// Vectors ordered by their `index` field.
    pub(crate) fn into_vectors(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|item| item.index);
        self.data.into_iter().map(|item| item.embedding).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(
            ensure_non_empty(["ok", "  "]),
            Err(EmbeddingError::EmptyInput)
        ));
        assert!(ensure_non_empty(["ok"]).is_ok());
    }

    #[test]
    fn vector_count_and_width_are_checked() {
        assert!(check_vectors(2, 3, vec![vec![0.0; 3], vec![0.0; 3]]).is_ok());
        assert!(matches!(
            check_vectors(2, 3, vec![vec![0.0; 3]]),
            Err(EmbeddingError::Malformed(_))
        ));
        assert!(matches!(
            check_vectors(1, 3, vec![vec![0.0; 4]]),
            Err(EmbeddingError::Malformed(_))
        ));
    }

    #[test]
    fn openai_payload_is_reordered_by_index() {
        let payload: OpenAiEmbeddingResponse = serde_json::from_str(
            r#"{"data": [{"embedding": [2.0], "index": 1}, {"embedding": [1.0], "index": 0}]}"#,
        )
        .unwrap();
        assert_eq!(payload.into_vectors(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn provider_errors_keep_their_class() {
        let err: EmbeddingError = ProviderError::Transient("HTTP 503".into()).into();
        assert!(err.is_transient());
        let err: EmbeddingError = ProviderError::Fatal("HTTP 401".into()).into();
        assert!(!err.is_transient());
    }
}
