//! Endpoint directory for the Azure-style deployment proxy.
//!
//! The directory is a JSON document shaped as
//! `{environment: {model: [{endpoint, model_version}]}}`. It is fetched once
//! and cached, or fetched on every lookup with the cache as fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::ProviderError;
use super::types::Endpoint;

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryEntry {
    pub endpoint: String,
    #[serde(default)]
    pub model_version: String,
}

pub type DirectoryListing = HashMap<String, HashMap<String, Vec<DirectoryEntry>>>;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to fetch endpoint directory: {0}")]
    Fetch(String),
    #[error("endpoint directory is malformed: {0}")]
    Parse(String),
    #[error("no endpoints for environment '{environment}', model '{model}'{version}")]
    NoEndpoints {
        environment: String,
        model: String,
        version: String,
    },
}

impl From<DirectoryError> for ProviderError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Fetch(_) => ProviderError::Transient(err.to_string()),
            _ => ProviderError::Fatal(err.to_string()),
        }
    }
}

enum Source {
    Remote { url: String, refresh_per_call: bool },
    Fixed(Vec<String>),
}

pub struct EndpointDirectory {
    source: Source,
    environment: String,
    client: Client,
    cache: RwLock<Option<Arc<DirectoryListing>>>,
}

impl EndpointDirectory {
    pub fn remote(
        client: Client,
        url: impl Into<String>,
        environment: impl Into<String>,
        refresh_per_call: bool,
    ) -> Self {
        Self {
            source: Source::Remote {
                url: url.into(),
                refresh_per_call,
            },
            environment: environment.into(),
            client,
            cache: RwLock::new(None),
        }
    }

    /// A directory that always answers with the same endpoint roots.
    pub fn fixed(urls: Vec<String>, environment: impl Into<String>) -> Self {
        Self {
            source: Source::Fixed(urls),
            environment: environment.into(),
            client: Client::new(),
            cache: RwLock::new(None),
        }
    }

    /// Loads the listing ahead of the first request.
    pub async fn prime(&self) -> Result<(), DirectoryError> {
        if let Source::Remote { url, .. } = &self.source {
            let listing = self.fetch(url).await?;
            info!(
                "Endpoint directory loaded: {} environment(s) from {}",
                listing.len(),
                url
            );
            *self.cache.write().await = Some(Arc::new(listing));
        }
        Ok(())
    }

    /// Chat deployments for `model` whose version contains `model_version`.
    pub async fn chat_endpoints(
        &self,
        model: &str,
        model_version: &str,
    ) -> Result<Vec<Endpoint>, DirectoryError> {
        let listing = match self.listing().await? {
            Some(listing) => listing,
            None => return Ok(self.fixed_endpoints(model)),
        };

        let endpoints: Vec<Endpoint> = listing
            .get(&self.environment)
            .and_then(|models| models.get(model))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.model_version.contains(model_version))
                    .map(|entry| Endpoint::new(&entry.endpoint, model))
                    .collect()
            })
            .unwrap_or_default();

        if endpoints.is_empty() {
            return Err(DirectoryError::NoEndpoints {
                environment: self.environment.clone(),
                model: model.to_string(),
                version: format!(", version '{}'", model_version),
            });
        }
        Ok(endpoints)
    }

    /// Embedding deployments for `model`, falling back to the first model
    /// whose name mentions "embedding".
    pub async fn embedding_endpoints(&self, model: &str) -> Result<Vec<Endpoint>, DirectoryError> {
        let listing = match self.listing().await? {
            Some(listing) => listing,
            None => return Ok(self.fixed_endpoints(model)),
        };

        let models = listing.get(&self.environment);
        let exact = models
            .and_then(|models| models.get(model))
            .filter(|entries| !entries.is_empty())
            .map(|entries| (model.to_string(), entries));

        let chosen = exact.or_else(|| {
            let mut candidates: Vec<(&String, &Vec<DirectoryEntry>)> = models
                .map(|models| {
                    models
                        .iter()
                        .filter(|(name, entries)| {
                            name.to_lowercase().contains("embedding") && !entries.is_empty()
                        })
                        .collect()
                })
                .unwrap_or_default();
            candidates.sort_by(|a, b| a.0.cmp(b.0));
            candidates.into_iter().next().map(|(name, entries)| {
                warn!(
                    "No directory entry for embedding model '{}', using '{}'",
                    model, name
                );
                (name.clone(), entries)
            })
        });

        match chosen {
            Some((deployment, entries)) => Ok(entries
                .iter()
                .map(|entry| Endpoint::new(&entry.endpoint, deployment.as_str()))
                .collect()),
            None => Err(DirectoryError::NoEndpoints {
                environment: self.environment.clone(),
                model: model.to_string(),
                version: String::new(),
            }),
        }
    }

    fn fixed_endpoints(&self, deployment: &str) -> Vec<Endpoint> {
        match &self.source {
            Source::Fixed(urls) => urls
                .iter()
                .map(|url| Endpoint::new(url, deployment))
                .collect(),
            Source::Remote { .. } => Vec::new(),
        }
    }

    /// `None` for fixed directories.
    async fn listing(&self) -> Result<Option<Arc<DirectoryListing>>, DirectoryError> {
        let (url, refresh_per_call) = match &self.source {
            Source::Fixed(_) => return Ok(None),
            Source::Remote {
                url,
                refresh_per_call,
            } => (url, *refresh_per_call),
        };

        if !refresh_per_call {
            if let Some(cached) = self.cache.read().await.clone() {
                return Ok(Some(cached));
            }
        }

        match self.fetch(url).await {
            Ok(listing) => {
                let listing = Arc::new(listing);
                *self.cache.write().await = Some(listing.clone());
                Ok(Some(listing))
            }
            Err(err) => {
                if let Some(stale) = self.cache.read().await.clone() {
                    warn!("{}; using cached endpoint directory", err);
                    return Ok(Some(stale));
                }
                Err(err)
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<DirectoryListing, DirectoryError> {
        debug!("Fetching endpoint directory from {}", url);
        let response = self
            .client
            .get(url)
            .timeout(DIRECTORY_TIMEOUT)
            .send()
            .await
            .map_err(|e| DirectoryError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Fetch(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<DirectoryListing>()
            .await
            .map_err(|e| DirectoryError::Parse(e.to_string()))
    }
}
