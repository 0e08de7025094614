pub mod error;
pub mod paths;
pub mod service;
pub mod settings;
pub mod validation;

pub use error::ConfigError;
pub use paths::AppPaths;
pub use service::ConfigService;
pub use settings::{
    Credentials, DataSettings, EmbeddingProviderKind, EmbeddingSettings, GenerationSettings,
    IndexSettings, LlmProviderKind, RetrievalSettings, ServerSettings, Settings,
};
