use serde::{Deserialize, Serialize};

/// One concrete place a request can be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint root, without a trailing slash.
    pub url: String,
    /// Deployment or model name placed into the request path.
    pub deployment: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            deployment: deployment.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}
