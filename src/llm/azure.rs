use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::directory::EndpointDirectory;
use super::error::ProviderError;
use super::provider::LlmProvider;
use super::types::{ChatMessage, CompletionRequest, Endpoint};

/// Chat completions against Azure OpenAI deployments listed in an
/// [`EndpointDirectory`].
pub struct AzureOpenAiProvider {
    client: Client,
    directory: Arc<EndpointDirectory>,
    api_key: String,
    api_version: String,
    model: String,
    model_version: String,
}

impl AzureOpenAiProvider {
    pub fn new(
        client: Client,
        directory: Arc<EndpointDirectory>,
        api_key: String,
        api_version: String,
        model: String,
        model_version: String,
    ) -> Self {
        Self {
            client,
            directory,
            api_key,
            api_version,
            model,
            model_version,
        }
    }

    fn completions_url(&self, endpoint: &Endpoint) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.url, endpoint.deployment, self.api_version
        )
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    model: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn endpoints(&self) -> Result<Vec<Endpoint>, ProviderError> {
        Ok(self
            .directory
            .chat_endpoints(&self.model, &self.model_version)
            .await?)
    }

    async fn complete(
        &self,
        endpoint: &Endpoint,
        request: &CompletionRequest,
    ) -> Result<String, ProviderError> {
        let body = ChatCompletionBody {
            messages: vec![ChatMessage::user(request.prompt.clone())],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            model: &self.model,
        };

        let res = self
            .client
            .post(self.completions_url(endpoint))
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &text));
        }

        let payload: ChatCompletionResponse =
            res.json().await.map_err(ProviderError::from_transport)?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Transient("completion contained no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_targets_the_deployment() {
        let provider = AzureOpenAiProvider::new(
            Client::new(),
            Arc::new(EndpointDirectory::fixed(vec![], "nonprod")),
            "key".into(),
            "2024-02-01".into(),
            "gpt-4o-mini-global".into(),
            "2024-07-18".into(),
        );
        let endpoint = Endpoint::new("https://east.example/", "gpt-4o-mini-global");

        assert_eq!(
            provider.completions_url(&endpoint),
            "https://east.example/openai/deployments/gpt-4o-mini-global/chat/completions?api-version=2024-02-01"
        );
    }
}
