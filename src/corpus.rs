//! Few-shot example corpus and the static prompt documents.
//!
//! Both are loaded once at startup and are read-only afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate example id {0}")]
    DuplicateId(u64),
}

/// One worked example: a description and the configuration it should yield.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExampleRecord {
    pub id: u64,
    #[serde(rename = "type", alias = "chart_kind", default)]
    pub chart_kind: String,
    pub description: String,
    #[serde(rename = "config", alias = "target_config")]
    pub target_config: Value,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub headers: String,
    #[serde(rename = "source", alias = "provenance", default)]
    pub provenance: String,
    /// Shared by every phrasing of the same underlying configuration.
    #[serde(default)]
    pub original_id: Option<u64>,
}

impl ExampleRecord {
    fn is_indexable(&self) -> bool {
        !self.description.trim().is_empty() && !is_empty_config(&self.target_config)
    }
}

fn is_empty_config(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    records: Vec<ExampleRecord>,
    by_id: HashMap<u64, usize>,
}

impl Corpus {
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let raw = fs::read_to_string(path).map_err(|source| CorpusError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<ExampleRecord> =
            serde_json::from_str(&raw).map_err(|source| CorpusError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let corpus = Self::from_records(records)?;
        info!(
            "Loaded {} indexable examples from {}",
            corpus.len(),
            path.display()
        );
        Ok(corpus)
    }

    /// Builds a corpus, skipping records without a description or
    /// configuration. Duplicate ids are rejected.
    pub fn from_records(records: Vec<ExampleRecord>) -> Result<Self, CorpusError> {
        let mut kept = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id) {
                return Err(CorpusError::DuplicateId(record.id));
            }
            if !record.is_indexable() {
                warn!("Skipping example {}: empty description or config", record.id);
                continue;
            }
            by_id.insert(record.id, kept.len());
            kept.push(record);
        }

        Ok(Self {
            records: kept,
            by_id,
        })
    }

    pub fn get(&self, id: u64) -> Option<&ExampleRecord> {
        self.by_id.get(&id).map(|index| &self.records[*index])
    }

    pub fn records(&self) -> &[ExampleRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// SHA-256 over the `(id, description)` pairs in id order. Any change to
    /// what gets embedded changes the fingerprint.
    pub fn fingerprint(&self) -> String {
        let ordered: BTreeMap<u64, &str> = self
            .records
            .iter()
            .map(|record| (record.id, record.description.as_str()))
            .collect();

        let mut hasher = Sha256::new();
        for (id, description) in ordered {
            hasher.update(id.to_le_bytes());
            hasher.update((description.len() as u64).to_le_bytes());
            hasher.update(description.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Static instruction and schema documents fed verbatim into every prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptAssets {
    pub rules: String,
    pub schema: String,
}

impl PromptAssets {
    pub fn load(rules_path: &Path, schema_path: &Path) -> Result<Self, CorpusError> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|source| CorpusError::Read {
                path: path.to_path_buf(),
                source,
            })
        };
        Ok(Self {
            rules: read(rules_path)?,
            schema: read(schema_path)?,
        })
    }
}
