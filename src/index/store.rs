//! SQLite persistence for the vector index.
//!
//! The artifact is self-describing: `index_manifest` records which provider,
//! model and dimensionality produced the vectors in `index_entries`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::IndexError;

/// Bumped whenever the persisted layout changes; older artifacts are rebuilt.
pub const FORMAT_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexManifest {
    pub format_version: i64,
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub entry_count: usize,
    pub corpus_fingerprint: String,
    pub built_at: DateTime<Utc>,
}

pub struct IndexStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl IndexStore {
    pub async fn open(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(2)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn init_schema(&self) -> Result<(), IndexError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_manifest (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                format_version INTEGER NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                entry_count INTEGER NOT NULL,
                corpus_fingerprint TEXT NOT NULL,
                built_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_entries (
                id INTEGER PRIMARY KEY,
                vector BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn serialize_vector(vector: &[f32]) -> Vec<u8> {
        vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    pub async fn read_manifest(&self) -> Result<Option<IndexManifest>, IndexError> {
        let row = sqlx::query(
            "SELECT format_version, provider, model, dimensions, entry_count, corpus_fingerprint, built_at
             FROM index_manifest WHERE slot = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let built_at: String = row.get("built_at");
        let built_at = DateTime::parse_from_rfc3339(&built_at)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| IndexError::Corrupt {
                id: -1,
                message: format!("manifest built_at: {}", e),
            })?;

        Ok(Some(IndexManifest {
            format_version: row.get("format_version"),
            provider: row.get("provider"),
            model: row.get("model"),
            dimensions: row.get::<i64, _>("dimensions").max(0) as usize,
            entry_count: row.get::<i64, _>("entry_count").max(0) as usize,
            corpus_fingerprint: row.get("corpus_fingerprint"),
            built_at,
        }))
    }

    /// All persisted vectors, ordered by id. Each must be `dimensions` wide.
    pub async fn load_entries(&self, dimensions: usize) -> Result<Vec<(u64, Vec<f32>)>, IndexError> {
        let rows = sqlx::query("SELECT id, vector FROM index_entries ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let blob: Vec<u8> = row.get("vector");
            if blob.len() != dimensions * 4 {
                return Err(IndexError::Corrupt {
                    id,
                    message: format!(
                        "expected {} bytes for {} dimensions, found {}",
                        dimensions * 4,
                        dimensions,
                        blob.len()
                    ),
                });
            }
            let id = u64::try_from(id).map_err(|_| IndexError::Corrupt {
                id,
                message: "negative id".to_string(),
            })?;
            entries.push((id, Self::deserialize_vector(&blob)));
        }
        Ok(entries)
    }

    /// Replaces the manifest and every entry in one transaction.
    pub async fn replace(
        &self,
        manifest: &IndexManifest,
        entries: &[(u64, Vec<f32>)],
    ) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_entries")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_manifest")
            .execute(&mut *tx)
            .await?;

        for (id, vector) in entries {
            let id = i64::try_from(*id).map_err(|_| IndexError::Corrupt {
                id: -1,
                message: format!("id {} does not fit in an INTEGER column", id),
            })?;
            sqlx::query("INSERT INTO index_entries (id, vector) VALUES (?1, ?2)")
                .bind(id)
                .bind(Self::serialize_vector(vector))
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO index_manifest
                (slot, format_version, provider, model, dimensions, entry_count, corpus_fingerprint, built_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(manifest.format_version)
        .bind(&manifest.provider)
        .bind(&manifest.model)
        .bind(manifest.dimensions as i64)
        .bind(manifest.entry_count as i64)
        .bind(&manifest.corpus_fingerprint)
        .bind(manifest.built_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(dimensions: usize, entry_count: usize) -> IndexManifest {
        IndexManifest {
            format_version: FORMAT_VERSION,
            provider: "local".to_string(),
            model: "bge-m3".to_string(),
            dimensions,
            entry_count,
            corpus_fingerprint: "abc".to_string(),
            built_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unusable_parent_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = IndexStore::open(&blocker.join("vector_index.db"))
            .await
            .err()
            .unwrap();

        match err {
            IndexError::Directory { path, .. } => assert_eq!(path, blocker),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fresh_store_has_no_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("vector_index.db")).await.unwrap();

        assert!(store.read_manifest().await.unwrap().is_none());
        assert!(store.load_entries(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_persists_manifest_and_entries_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_index.db");
        let entries = vec![(2, vec![0.0, 1.0, 0.5]), (1, vec![1.0, 0.0, -0.5])];

        {
            let store = IndexStore::open(&path).await.unwrap();
            store.replace(&manifest(3, 2), &entries).await.unwrap();
        }

        let store = IndexStore::open(&path).await.unwrap();
        let stored = store.read_manifest().await.unwrap().unwrap();
        assert_eq!(stored.dimensions, 3);
        assert_eq!(stored.entry_count, 2);
        assert_eq!(stored.provider, "local");

        let loaded = store.load_entries(3).await.unwrap();
        assert_eq!(
            loaded,
            vec![(1, vec![1.0, 0.0, -0.5]), (2, vec![0.0, 1.0, 0.5])]
        );
    }

    #[tokio::test]
    async fn replace_discards_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("vector_index.db")).await.unwrap();

        store
            .replace(&manifest(2, 2), &[(1, vec![1.0, 0.0]), (2, vec![0.0, 1.0])])
            .await
            .unwrap();
        store.replace(&manifest(2, 1), &[(5, vec![1.0, 1.0])]).await.unwrap();

        assert_eq!(store.load_entries(2).await.unwrap(), vec![(5, vec![1.0, 1.0])]);
        assert_eq!(store.read_manifest().await.unwrap().unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn width_mismatch_is_reported_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(&dir.path().join("vector_index.db")).await.unwrap();
        store.replace(&manifest(2, 1), &[(1, vec![1.0, 0.0])]).await.unwrap();

        assert!(matches!(
            store.load_entries(3).await,
            Err(IndexError::Corrupt { id: 1, .. })
        ));
    }
}
