pub mod azure;
pub mod directory;
pub mod error;
pub mod gemini;
pub mod provider;
pub mod service;
pub mod types;

pub use azure::AzureOpenAiProvider;
pub use directory::{DirectoryError, EndpointDirectory};
pub use error::{GenerationFailure, ProviderError};
pub use gemini::GeminiProvider;
pub use provider::{GenerationBackend, LlmProvider};
pub use service::GenerationService;
pub use types::{CompletionRequest, Endpoint};
