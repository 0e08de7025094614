use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use super::error::ConfigError;
use super::paths::AppPaths;
use super::validation::validate_config;

const DEFAULT_TOP_K: usize = 25;
const DEFAULT_LOCAL_EMBEDDING_ENDPOINT: &str = "http://127.0.0.1:8090/v1/embeddings";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini-global";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
const DEFAULT_MODEL_VERSION: &str = "2024-07-18";

/// Chat model names served through the endpoint directory and the
/// deployment version each one is pinned to.
const MODEL_VERSIONS: [(&str, &str); 3] = [
    ("gpt-4o-mini-global", "2024-07-18"),
    ("gpt-4o-global", "2024-05-13"),
    ("gpt-4-turbo-global", "turbo-2024-04-09"),
];

pub fn model_version_for(model: &str) -> Option<&'static str> {
    MODEL_VERSIONS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, version)| *version)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    Local,
    OpenAi,
    Gemini,
}

impl EmbeddingProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Local => "bge-m3",
            Self::OpenAi => "text-embedding-3-small",
            Self::Gemini => "text-embedding-004",
        }
    }

    pub fn default_dimensions(&self) -> usize {
        match self {
            Self::Local => 1024,
            Self::OpenAi => 1536,
            Self::Gemini => 768,
        }
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Gemini,
}

impl LlmProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DataSettings {
    pub examples_path: PathBuf,
    pub schema_path: PathBuf,
    pub rules_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub path: PathBuf,
    pub rebuild: bool,
}

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub dedupe_by_config: bool,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dimensions: usize,
    /// Local server URL for `local`; the Gemini API root for `gemini`.
    pub endpoint: String,
    pub api_version: String,
    pub query_instruction: Option<String>,
    pub timeout: Duration,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub provider: LlmProviderKind,
    pub model: String,
    pub model_version: String,
    pub environment: String,
    pub api_version: String,
    pub directory_url: Option<String>,
    /// Fixed endpoint roots used instead of the directory when non-empty.
    pub endpoints: Vec<String>,
    pub refresh_directory_per_call: bool,
    pub base_url: String,
    pub max_retries: usize,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub retry_backoff: Duration,
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub azure_openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "****");
        f.debug_struct("Credentials")
            .field("azure_openai_api_key", &mask(&self.azure_openai_api_key))
            .field("google_api_key", &mask(&self.google_api_key))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Typed view over the merged configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data: DataSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub credentials: Credentials,
    pub server: ServerSettings,
}

impl Settings {
    pub fn resolve(config: &Value, paths: &AppPaths) -> Result<Self, ConfigError> {
        validate_config(config)?;

        let data_dir = paths.resolve(&string_at(config, &["data", "dir"]).unwrap_or_else(|| "data".into()));
        let data_file = |key: &str, default: &str| {
            data_dir.join(string_at(config, &["data", key]).unwrap_or_else(|| default.to_string()))
        };
        let data = DataSettings {
            examples_path: data_file("examples_file", "few_shot_examples.json"),
            schema_path: data_file("schema_file", "schema.md"),
            rules_path: data_file("rules_file", "prompt_rules.md"),
        };

        let index = IndexSettings {
            path: string_at(config, &["index", "path"])
                .map(|path| paths.resolve(&path))
                .unwrap_or_else(|| paths.index_path.clone()),
            rebuild: bool_at(config, &["index", "rebuild"]).unwrap_or(false),
        };

        let retrieval = RetrievalSettings {
            top_k: u64_at(config, &["retrieval", "top_k"])
                .map(|k| k as usize)
                .unwrap_or(DEFAULT_TOP_K),
            dedupe_by_config: bool_at(config, &["retrieval", "dedupe_by_config"]).unwrap_or(false),
        };

        let embedding = resolve_embedding(config)?;
        let generation = resolve_generation(config)?;

        let credentials = Credentials {
            azure_openai_api_key: secret_at(config, "azure_openai_api_key"),
            google_api_key: secret_at(config, "google_api_key"),
        };

        let server = ServerSettings {
            host: string_at(config, &["server", "host"]).unwrap_or_else(|| "127.0.0.1".into()),
            port: u64_at(config, &["server", "port"])
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(8000),
        };

        let settings = Settings {
            data,
            index,
            retrieval,
            embedding,
            generation,
            credentials,
            server,
        };
        settings.check_credentials()?;
        Ok(settings)
    }

    fn check_credentials(&self) -> Result<(), ConfigError> {
        let needs_azure = self.embedding.provider == EmbeddingProviderKind::OpenAi
            || self.generation.provider == LlmProviderKind::OpenAi;
        let needs_google = self.embedding.provider == EmbeddingProviderKind::Gemini
            || self.generation.provider == LlmProviderKind::Gemini;

        if needs_azure && self.credentials.azure_openai_api_key.is_none() {
            return Err(ConfigError::MissingCredential {
                provider: "openai".to_string(),
                key: "credentials.azure_openai_api_key".to_string(),
            });
        }
        if needs_google && self.credentials.google_api_key.is_none() {
            return Err(ConfigError::MissingCredential {
                provider: "gemini".to_string(),
                key: "credentials.google_api_key".to_string(),
            });
        }
        if needs_azure
            && self.generation.directory_url.is_none()
            && self.generation.endpoints.is_empty()
        {
            return Err(ConfigError::invalid(
                "generation.directory_url",
                "openai providers need a directory_url or a static endpoints list",
            ));
        }
        Ok(())
    }
}

fn resolve_embedding(config: &Value) -> Result<EmbeddingSettings, ConfigError> {
    let provider = match string_at(config, &["embedding", "provider"]) {
        Some(raw) => EmbeddingProviderKind::parse(&raw)
            .ok_or_else(|| ConfigError::invalid("embedding.provider", "unknown provider"))?,
        None => EmbeddingProviderKind::Local,
    };

    let provider_model = match provider {
        EmbeddingProviderKind::Local => None,
        EmbeddingProviderKind::OpenAi => string_at(config, &["embedding", "openai_model"]),
        EmbeddingProviderKind::Gemini => string_at(config, &["embedding", "gemini_model"]),
    };
    let model = string_at(config, &["embedding", "model"])
        .or(provider_model)
        .unwrap_or_else(|| provider.default_model().to_string());

    let endpoint = match provider {
        EmbeddingProviderKind::Gemini => string_at(config, &["embedding", "base_url"])
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        _ => string_at(config, &["embedding", "endpoint"])
            .unwrap_or_else(|| DEFAULT_LOCAL_EMBEDDING_ENDPOINT.to_string()),
    };

    let query_instruction = string_at(config, &["embedding", "query_instruction"])
        .filter(|text| !text.trim().is_empty());

    Ok(EmbeddingSettings {
        provider,
        model,
        dimensions: u64_at(config, &["embedding", "dimensions"])
            .map(|d| d as usize)
            .unwrap_or_else(|| provider.default_dimensions()),
        endpoint,
        api_version: string_at(config, &["embedding", "api_version"])
            .or_else(|| string_at(config, &["generation", "api_version"]))
            .unwrap_or_else(|| "2024-02-01".to_string()),
        query_instruction,
        timeout: Duration::from_secs(u64_at(config, &["embedding", "timeout_secs"]).unwrap_or(30)),
        batch_size: u64_at(config, &["embedding", "batch_size"])
            .map(|size| size as usize)
            .unwrap_or(64),
    })
}

fn resolve_generation(config: &Value) -> Result<GenerationSettings, ConfigError> {
    let provider = match string_at(config, &["generation", "provider"]) {
        Some(raw) => LlmProviderKind::parse(&raw)
            .ok_or_else(|| ConfigError::invalid("generation.provider", "unknown provider"))?,
        None => LlmProviderKind::OpenAi,
    };

    let model = match provider {
        LlmProviderKind::OpenAi => string_at(config, &["generation", "model"])
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        LlmProviderKind::Gemini => string_at(config, &["generation", "gemini_model"])
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
    };

    let model_version = string_at(config, &["generation", "model_version"])
        .or_else(|| model_version_for(&model).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string());

    let endpoints = config
        .pointer("/generation/endpoints")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(GenerationSettings {
        provider,
        model,
        model_version,
        environment: string_at(config, &["generation", "environment"])
            .unwrap_or_else(|| "nonprod".to_string()),
        api_version: string_at(config, &["generation", "api_version"])
            .unwrap_or_else(|| "2024-02-01".to_string()),
        directory_url: string_at(config, &["generation", "directory_url"]),
        endpoints,
        refresh_directory_per_call: bool_at(config, &["generation", "refresh_directory_per_call"])
            .unwrap_or(false),
        base_url: string_at(config, &["generation", "base_url"])
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        max_retries: u64_at(config, &["generation", "max_retries"])
            .map(|n| n as usize)
            .unwrap_or(3),
        max_tokens: u64_at(config, &["generation", "max_tokens"])
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(4096),
        timeout: Duration::from_secs(u64_at(config, &["generation", "timeout_secs"]).unwrap_or(60)),
        retry_backoff: Duration::from_millis(
            u64_at(config, &["generation", "retry_backoff_ms"]).unwrap_or(250),
        ),
    })
}

fn value_at<'a>(config: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(config, |cursor, segment| cursor.get(*segment))
}

fn string_at(config: &Value, path: &[&str]) -> Option<String> {
    value_at(config, path)
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
}

fn u64_at(config: &Value, path: &[&str]) -> Option<u64> {
    value_at(config, path).and_then(Value::as_u64)
}

fn bool_at(config: &Value, path: &[&str]) -> Option<bool> {
    value_at(config, path).and_then(Value::as_bool)
}

fn secret_at(config: &Value, key: &str) -> Option<String> {
    string_at(config, &["credentials", key]).filter(|secret| !secret.is_empty())
}
