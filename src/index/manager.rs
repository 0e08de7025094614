use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::store::{IndexManifest, IndexStore, FORMAT_VERSION};
use super::{IndexError, IndexSnapshot, VectorIndex};
use crate::corpus::Corpus;
use crate::embedding::EmbeddingBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    Missing,
    Forced,
    FormatChanged,
    CorpusChanged,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RebuildReason::Missing => "no persisted index",
            RebuildReason::Forced => "rebuild requested",
            RebuildReason::FormatChanged => "index format changed",
            RebuildReason::CorpusChanged => "corpus changed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { entries: usize },
    Built { entries: usize, reason: RebuildReason },
}

/// Owns the lifecycle of the vector index: loading the persisted artifact,
/// validating it against the active backend, and rebuilding it.
pub struct IndexManager {
    store: IndexStore,
    index: Arc<VectorIndex>,
    backend: Arc<dyn EmbeddingBackend>,
    corpus: Arc<Corpus>,
    rebuild_lock: Mutex<()>,
}

impl IndexManager {
    pub fn new(
        store: IndexStore,
        index: Arc<VectorIndex>,
        backend: Arc<dyn EmbeddingBackend>,
        corpus: Arc<Corpus>,
    ) -> Self {
        Self {
            store,
            index,
            backend,
            corpus,
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn index(&self) -> Arc<VectorIndex> {
        self.index.clone()
    }

    /// Loads the persisted index, rebuilding it when missing, forced, stale
    /// in format, or built from a different corpus. A dimension or
    /// provider/model mismatch is fatal unless `force` is set.
    pub async fn load_or_build(&self, force: bool) -> Result<LoadOutcome, IndexError> {
        let _guard = self.rebuild_lock.lock().await;

        let Some(manifest) = self.store.read_manifest().await? else {
            return self.build_and_swap(RebuildReason::Missing).await;
        };
        if force {
            return self.build_and_swap(RebuildReason::Forced).await;
        }
        if manifest.format_version != FORMAT_VERSION {
            return self.build_and_swap(RebuildReason::FormatChanged).await;
        }

        self.check_compatible(&manifest)?;

        if manifest.corpus_fingerprint != self.corpus.fingerprint() {
            return self.build_and_swap(RebuildReason::CorpusChanged).await;
        }

        let entries = self.store.load_entries(manifest.dimensions).await?;
        if entries.len() != manifest.entry_count {
            warn!(
                "Persisted index lists {} entries but holds {}; rebuilding",
                manifest.entry_count,
                entries.len()
            );
            return self.build_and_swap(RebuildReason::CorpusChanged).await;
        }

        let snapshot = IndexSnapshot::build(manifest.dimensions, entries)?;
        let count = snapshot.len();
        self.index.replace(snapshot);
        info!(
            "Loaded vector index from {}: {} entries, {} dimensions ({}/{}, built {})",
            self.store.path().display(),
            count,
            manifest.dimensions,
            manifest.provider,
            manifest.model,
            manifest.built_at.to_rfc3339()
        );
        Ok(LoadOutcome::Loaded { entries: count })
    }

    /// Re-embeds the whole corpus and swaps the result in. Searches keep
    /// using the previous index until the swap.
    pub async fn rebuild(&self) -> Result<LoadOutcome, IndexError> {
        let Ok(_guard) = self.rebuild_lock.try_lock() else {
            return Err(IndexError::RebuildInProgress);
        };
        self.build_and_swap(RebuildReason::Forced).await
    }

    fn check_compatible(&self, manifest: &IndexManifest) -> Result<(), IndexError> {
        if manifest.dimensions != self.backend.dimensions() {
            return Err(IndexError::DimensionMismatch {
                index: manifest.dimensions,
                backend: self.backend.dimensions(),
            });
        }
        if manifest.provider != self.backend.name() || manifest.model != self.backend.model() {
            return Err(IndexError::ProviderMismatch {
                stored_provider: manifest.provider.clone(),
                stored_model: manifest.model.clone(),
                provider: self.backend.name().to_string(),
                model: self.backend.model().to_string(),
            });
        }
        Ok(())
    }

    async fn build_and_swap(&self, reason: RebuildReason) -> Result<LoadOutcome, IndexError> {
        let dimensions = self.backend.dimensions();
        info!(
            "Building vector index ({}): embedding {} examples with {}/{}",
            reason,
            self.corpus.len(),
            self.backend.name(),
            self.backend.model()
        );

        let records = self.corpus.records();
        let vectors = if records.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = records.iter().map(|r| r.description.clone()).collect();
            self.backend.encode_batch(&texts).await?
        };
        if vectors.len() != records.len() {
            return Err(IndexError::Corrupt {
                id: -1,
                message: format!(
                    "embedding backend returned {} vectors for {} examples",
                    vectors.len(),
                    records.len()
                ),
            });
        }

        let snapshot = IndexSnapshot::build(
            dimensions,
            records.iter().map(|r| r.id).zip(vectors).collect(),
        )?;
        let entries: Vec<(u64, Vec<f32>)> = snapshot.entries().collect();

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            provider: self.backend.name().to_string(),
            model: self.backend.model().to_string(),
            dimensions,
            entry_count: entries.len(),
            corpus_fingerprint: self.corpus.fingerprint(),
            built_at: Utc::now(),
        };
        self.store.replace(&manifest, &entries).await?;

        let count = snapshot.len();
        self.index.replace(snapshot);
        info!("Vector index ready: {} entries, {} dimensions", count, dimensions);
        Ok(LoadOutcome::Built {
            entries: count,
            reason,
        })
    }
}
