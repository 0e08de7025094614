use thiserror::Error;

use crate::core::config::ConfigError;
use crate::corpus::CorpusError;
use crate::embedding::EmbeddingError;
use crate::index::IndexError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load example corpus: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Failed to create embedding backend: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to prepare vector index: {0}")]
    Index(#[from] IndexError),

    #[error("Failed to initialize generation backend: {0}")]
    Generation(#[source] anyhow::Error),
}
