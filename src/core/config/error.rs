use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config at '{path}': {message}")]
    Invalid { path: String, message: String },

    #[error("Missing credential '{key}' required by the {provider} provider")]
    MissingCredential { provider: String, key: String },

    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },
}

impl ConfigError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(path: &str, expected: &str) -> Self {
        Self::invalid(path, format!("expected {}", expected))
    }
}
