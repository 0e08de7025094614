use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::corpus::{Corpus, ExampleRecord};
use crate::embedding::{EmbeddingBackend, EmbeddingError};
use crate::index::{IndexError, VectorIndex};

pub const DEFAULT_TOP_K: usize = 25;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("vector search failed: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedExample {
    pub record: ExampleRecord,
    pub score: f32,
}

/// Finds the corpus examples closest to a description.
pub struct Retriever {
    backend: Arc<dyn EmbeddingBackend>,
    index: Arc<VectorIndex>,
    corpus: Arc<Corpus>,
    dedupe_by_config: bool,
}

impl Retriever {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        index: Arc<VectorIndex>,
        corpus: Arc<Corpus>,
        dedupe_by_config: bool,
    ) -> Self {
        Self {
            backend,
            index,
            corpus,
            dedupe_by_config,
        }
    }

    /// Up to `k` examples, most similar first, ties by ascending id. With
    /// deduplication on, only the best phrasing of each distinct target
    /// configuration is kept.
    pub async fn retrieve(
        &self,
        description: &str,
        k: usize,
    ) -> Result<Vec<RetrievedExample>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = self.backend.encode_query(description).await?;
        let snapshot = self.index.snapshot();
        let limit = if self.dedupe_by_config {
            snapshot.len()
        } else {
            k
        };
        let hits = snapshot.search(&query, limit)?;

        let mut seen_configs = HashSet::new();
        let mut results = Vec::with_capacity(k.min(hits.len()));
        for (id, score) in hits {
            let Some(record) = self.corpus.get(id) else {
                warn!("Index entry {} has no matching example; skipping", id);
                continue;
            };
            if self.dedupe_by_config && !seen_configs.insert(config_key(&record.target_config)) {
                continue;
            }
            results.push(RetrievedExample {
                record: record.clone(),
                score,
            });
            if results.len() == k {
                break;
            }
        }

        debug!(
            "Retrieved {} examples (k={}, index size={})",
            results.len(),
            k,
            snapshot.len()
        );
        Ok(results)
    }
}

/// Key-order-independent identity of a configuration.
fn config_key(config: &Value) -> String {
    canonical(config).to_string()
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(key, value)| (key, canonical(value))).collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, value)| (key.clone(), value))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
