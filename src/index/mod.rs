//! In-memory vector index over the corpus embeddings, with SQLite
//! persistence and whole-index rebuilds.

pub mod manager;
pub mod store;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use ndarray::Array2;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::vector_math::{l2_normalized, rank_top_k};

pub use manager::{IndexManager, LoadOutcome, RebuildReason};
pub use store::{IndexManifest, IndexStore, FORMAT_VERSION};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index dimension mismatch: index holds {index}-dimensional vectors, embedding backend produces {backend}")]
    DimensionMismatch { index: usize, backend: usize },
    #[error("persisted index was built with {stored_provider}/{stored_model}, but {provider}/{model} is configured; set index.rebuild to rebuild it")]
    ProviderMismatch {
        stored_provider: String,
        stored_model: String,
        provider: String,
        model: String,
    },
    #[error("duplicate index entry {0}")]
    DuplicateEntry(u64),
    #[error("corrupt index entry {id}: {message}")]
    Corrupt { id: i64, message: String },
    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("cannot create index directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("embedding failed while building the index: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("an index rebuild is already running")]
    RebuildInProgress,
}

impl IndexError {
    /// Mismatches between the persisted artifact and the active backend.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            IndexError::DimensionMismatch { .. } | IndexError::ProviderMismatch { .. }
        )
    }
}

/// One immutable generation of the index. Rows of `matrix` are unit length
/// and line up with `ids`.
#[derive(Debug)]
pub struct IndexSnapshot {
    ids: Vec<u64>,
    matrix: Array2<f32>,
    dimensions: usize,
}

impl IndexSnapshot {
    pub fn empty(dimensions: usize) -> Self {
        Self {
            ids: Vec::new(),
            matrix: Array2::zeros((0, dimensions)),
            dimensions,
        }
    }

    pub fn build(dimensions: usize, entries: Vec<(u64, Vec<f32>)>) -> Result<Self, IndexError> {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut ids = Vec::with_capacity(entries.len());
        let mut flat = Vec::with_capacity(entries.len() * dimensions);

        for (id, vector) in entries {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    index: dimensions,
                    backend: vector.len(),
                });
            }
            if !seen.insert(id) {
                return Err(IndexError::DuplicateEntry(id));
            }
            ids.push(id);
            flat.extend(l2_normalized(vector));
        }

        let matrix = Array2::from_shape_vec((ids.len(), dimensions), flat).map_err(|e| {
            IndexError::Corrupt {
                id: -1,
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            ids,
            matrix,
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(id, unit vector)` pairs in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, Vec<f32>)> + '_ {
        self.ids
            .iter()
            .copied()
            .zip(self.matrix.rows().into_iter().map(|row| row.to_vec()))
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                index: self.dimensions,
                backend: query.len(),
            });
        }
        let query = l2_normalized(query.to_vec());
        rank_top_k(&self.matrix, &self.ids, &query, k).map_err(|e| {
            IndexError::DimensionMismatch {
                index: e.expected,
                backend: e.actual,
            }
        })
    }
}

/// The live index. Readers take a snapshot `Arc`; a rebuild swaps in a
/// complete new snapshot, so a search never sees a partial build.
#[derive(Debug)]
pub struct VectorIndex {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::empty(dimensions))),
        }
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replaces the whole index with `entries`.
    pub fn build(&self, dimensions: usize, entries: Vec<(u64, Vec<f32>)>) -> Result<(), IndexError> {
        self.replace(IndexSnapshot::build(dimensions, entries)?);
        Ok(())
    }

    pub fn replace(&self, snapshot: IndexSnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>, IndexError> {
        self.snapshot().search(query, k)
    }

    pub fn dimensions(&self) -> usize {
        self.snapshot().dimensions()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_returns_no_results() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn search_orders_by_similarity_then_id() {
        let index = VectorIndex::new(2);
        index
            .build(
                2,
                vec![
                    (4, vec![0.0, 2.0]),
                    (9, vec![5.0, 0.0]),
                    (2, vec![1.0, 0.0]),
                    (6, vec![1.0, 1.0]),
                ],
            )
            .unwrap();

        let hits = index.search(&[3.0, 0.0], 10).unwrap();
        let ids: Vec<u64> = hits.iter().map(|(id, _)| *id).collect();

        assert_eq!(ids, vec![2, 9, 6, 4]);
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn k_bounds_the_result_count() {
        let index = VectorIndex::new(2);
        index
            .build(2, vec![(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0]), (3, vec![1.0, 1.0])])
            .unwrap();

        assert_eq!(index.search(&[1.0, 0.0], 2).unwrap().len(), 2);
        assert_eq!(index.search(&[1.0, 0.0], 100).unwrap().len(), 3);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn rejects_mixed_dimensions_and_duplicates() {
        let err = IndexSnapshot::build(3, vec![(1, vec![1.0, 0.0, 0.0]), (2, vec![1.0])]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { index: 3, backend: 1 }));

        let err = IndexSnapshot::build(1, vec![(1, vec![1.0]), (1, vec![2.0])]).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateEntry(1)));
    }

    #[test]
    fn query_with_wrong_width_is_a_dimension_mismatch() {
        let index = VectorIndex::new(4);
        let err = index.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn replacing_keeps_existing_snapshots_intact() {
        let index = VectorIndex::new(1);
        index.build(1, vec![(1, vec![1.0])]).unwrap();
        let before = index.snapshot();

        index.build(1, vec![(1, vec![1.0]), (2, vec![1.0])]).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(index.len(), 2);
    }
}
