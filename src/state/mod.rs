use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::core::config::{AppPaths, ConfigService, EmbeddingProviderKind, LlmProviderKind, Settings};
use crate::core::http::build_client;
use crate::corpus::{Corpus, PromptAssets};
use crate::embedding::{create_backend, EmbeddingBackend};
use crate::generator::{ConfigGenerator, GeneratorOptions};
use crate::index::{IndexManager, IndexStore, LoadOutcome, VectorIndex};
use crate::llm::{
    AzureOpenAiProvider, EndpointDirectory, GeminiProvider, GenerationBackend, GenerationService,
    LlmProvider,
};
use crate::prompt::PromptBuilder;
use crate::retrieval::Retriever;

pub mod error;

use error::InitializationError;

/// Everything a request handler needs, built once at startup and shared
/// read-only. The only mutation after startup is an index rebuild, which
/// goes through [`IndexManager`].
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Arc<Settings>,
    pub corpus: Arc<Corpus>,
    pub embedding: Arc<dyn EmbeddingBackend>,
    pub index: Arc<IndexManager>,
    pub generator: Arc<ConfigGenerator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        Self::initialize_with(Arc::new(AppPaths::new())).await
    }

    /// Loads configuration from `paths`, builds both backends from it and
    /// assembles the pipeline.
    pub async fn initialize_with(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let raw = config.load_config()?;
        info!(
            "Effective configuration from {}: {}",
            config.config_path().display(),
            config.redact_sensitive_values(&raw)
        );
        let settings = Settings::resolve(&raw, &paths)?;

        let directory = build_directory(&settings).await?;
        let embedding = create_backend(
            &settings.embedding,
            &settings.credentials,
            directory.clone(),
        )?;
        let generation = build_generation(&settings, directory)?;

        Self::assemble(paths, settings, embedding, generation).await
    }

    /// Loads the corpus and prompt assets, loads or builds the index, and
    /// wires the generator around the given backends.
    pub async fn assemble(
        paths: Arc<AppPaths>,
        settings: Settings,
        embedding: Arc<dyn EmbeddingBackend>,
        generation: Arc<dyn GenerationBackend>,
    ) -> Result<Arc<Self>, InitializationError> {
        let corpus = Arc::new(Corpus::load(&settings.data.examples_path)?);
        let assets = PromptAssets::load(&settings.data.rules_path, &settings.data.schema_path)?;

        let store = IndexStore::open(&settings.index.path).await?;
        let index = Arc::new(VectorIndex::new(embedding.dimensions()));
        let manager = IndexManager::new(store, index.clone(), embedding.clone(), corpus.clone());

        match manager.load_or_build(settings.index.rebuild).await {
            Ok(LoadOutcome::Loaded { entries }) => {
                info!("Vector index ready: {} entries", entries)
            }
            Ok(LoadOutcome::Built { entries, reason }) => {
                info!("Vector index built ({}): {} entries", reason, entries)
            }
            Err(err) => {
                if err.is_configuration_error() {
                    error!(
                        "{}. Set index.rebuild: true to rebuild the index for the current backend",
                        err
                    );
                }
                return Err(err.into());
            }
        }

        let retriever = Retriever::new(
            embedding.clone(),
            index,
            corpus.clone(),
            settings.retrieval.dedupe_by_config,
        );
        let generator = ConfigGenerator::new(
            retriever,
            PromptBuilder::new(assets),
            generation,
            GeneratorOptions {
                top_k: settings.retrieval.top_k,
                max_retries: settings.generation.max_retries,
            },
        );

        Ok(Arc::new(AppState {
            paths,
            settings: Arc::new(settings),
            corpus,
            embedding,
            index: Arc::new(manager),
            generator: Arc::new(generator),
            started_at: Utc::now(),
        }))
    }
}

/// The endpoint directory shared by the Azure-style chat and embedding
/// backends. `None` when neither uses it.
async fn build_directory(
    settings: &Settings,
) -> Result<Option<Arc<EndpointDirectory>>, InitializationError> {
    let generation = &settings.generation;
    let needed = generation.provider == LlmProviderKind::OpenAi
        || settings.embedding.provider == EmbeddingProviderKind::OpenAi;
    if !needed {
        return Ok(None);
    }

    let Some(url) = &generation.directory_url else {
        info!(
            "Using {} static endpoint(s) for environment '{}'",
            generation.endpoints.len(),
            generation.environment
        );
        return Ok(Some(Arc::new(EndpointDirectory::fixed(
            generation.endpoints.clone(),
            generation.environment.clone(),
        ))));
    };

    let client = build_client(generation.timeout)
        .map_err(|e| InitializationError::Generation(e.into()))?;
    let directory = EndpointDirectory::remote(
        client,
        url.clone(),
        generation.environment.clone(),
        generation.refresh_directory_per_call,
    );
    if !generation.refresh_directory_per_call {
        if let Err(err) = directory.prime().await {
            warn!("{}; the directory will be fetched on first use", err);
        }
    }
    Ok(Some(Arc::new(directory)))
}

fn build_generation(
    settings: &Settings,
    directory: Option<Arc<EndpointDirectory>>,
) -> Result<Arc<dyn GenerationBackend>, InitializationError> {
    let generation = &settings.generation;
    let client = build_client(generation.timeout)
        .map_err(|e| InitializationError::Generation(e.into()))?;

    let provider: Arc<dyn LlmProvider> = match generation.provider {
        LlmProviderKind::OpenAi => {
            let api_key = settings
                .credentials
                .azure_openai_api_key
                .clone()
                .ok_or_else(|| missing("credentials.azure_openai_api_key"))?;
            let directory = directory.ok_or_else(|| missing("generation.directory_url"))?;
            Arc::new(AzureOpenAiProvider::new(
                client,
                directory,
                api_key,
                generation.api_version.clone(),
                generation.model.clone(),
                generation.model_version.clone(),
            ))
        }
        LlmProviderKind::Gemini => {
            let api_key = settings
                .credentials
                .google_api_key
                .clone()
                .ok_or_else(|| missing("credentials.google_api_key"))?;
            Arc::new(GeminiProvider::new(
                client,
                generation.base_url.clone(),
                api_key,
                generation.model.clone(),
            ))
        }
    };

    info!(
        "Generation backend: {} model={} (max_retries={}, timeout={}s)",
        provider.name(),
        provider.model(),
        generation.max_retries,
        generation.timeout.as_secs()
    );

    Ok(Arc::new(GenerationService::new(
        provider,
        generation.max_tokens,
        generation.timeout,
        generation.retry_backoff,
    )))
}

fn missing(key: &str) -> InitializationError {
    InitializationError::Generation(anyhow::anyhow!("'{}' is not configured", key))
}
