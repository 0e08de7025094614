use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    check_vectors, ensure_non_empty, EmbeddingBackend, EmbeddingError, EmbeddingResult,
    OpenAiEmbeddingResponse,
};
use crate::llm::{Endpoint, EndpointDirectory, ProviderError};

/// Azure OpenAI embeddings, resolved through the shared endpoint directory.
/// A transient failure on one deployment moves on to the next.
pub struct AzureEmbeddingBackend {
    client: Client,
    directory: Arc<EndpointDirectory>,
    api_key: String,
    api_version: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

impl AzureEmbeddingBackend {
    pub fn new(
        client: Client,
        directory: Arc<EndpointDirectory>,
        api_key: String,
        api_version: String,
        model: String,
        dimensions: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            directory,
            api_key,
            api_version,
            model,
            dimensions,
            batch_size: batch_size.max(1),
        }
    }

    fn embeddings_url(&self, endpoint: &Endpoint) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            endpoint.url, endpoint.deployment, self.api_version
        )
    }

    async fn request_once(
        &self,
        endpoint: &Endpoint,
        input: &[String],
    ) -> EmbeddingResult<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            input,
            dimensions: endpoint
                .deployment
                .contains("text-embedding-3")
                .then_some(self.dimensions),
        };

        let res = self
            .client
            .post(self.embeddings_url(endpoint))
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &text).into());
        }

        let payload: OpenAiEmbeddingResponse =
            res.json().await.map_err(ProviderError::from_transport)?;
        check_vectors(input.len(), self.dimensions, payload.into_vectors())
    }

    async fn request(&self, input: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let endpoints = self
            .directory
            .embedding_endpoints(&self.model)
            .await
            .map_err(ProviderError::from)?;

        let mut last_error = None;
        for endpoint in &endpoints {
            match self.request_once(endpoint, input).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() => {
                    warn!("Embedding request to {} failed: {}", endpoint.url, err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            EmbeddingError::Config(format!("no embedding endpoints for {}", self.model))
        }))
    }
}

#[async_trait]
impl EmbeddingBackend for AzureEmbeddingBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn encode_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        ensure_non_empty(texts.iter().map(String::as_str))?;

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            debug!("Embedding batch of {} texts with {}", chunk.len(), self.model);
            vectors.extend(self.request(chunk).await?);
        }
        Ok(vectors)
    }

    async fn encode_query(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        ensure_non_empty([text])?;
        let mut vectors = self.request(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve() -> String {
        let router = Router::new().route(
            "/:region/openai/deployments/:deployment/embeddings",
            post(
                |Path((region, _deployment)): Path<(String, String)>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    if headers.get("api-key").and_then(|v| v.to_str().ok()) != Some("secret") {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    if region == "busy" {
                        return Err(StatusCode::TOO_MANY_REQUESTS);
                    }
                    let count = body["input"].as_array().map(Vec::len).unwrap_or(0);
                    let data: Vec<Value> = (0..count)
                        .map(|i| json!({ "embedding": [i as f32, 1.0], "index": i }))
                        .collect();
                    Ok(Json(json!({ "data": data })))
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn backend(base: &str, key: &str) -> AzureEmbeddingBackend {
        let directory = EndpointDirectory::fixed(
            vec![format!("{}/busy", base), format!("{}/calm", base)],
            "nonprod",
        );
        AzureEmbeddingBackend::new(
            Client::new(),
            Arc::new(directory),
            key.to_string(),
            "2024-02-01".into(),
            "text-embedding-ada-002".into(),
            2,
            16,
        )
    }

    #[tokio::test]
    async fn fails_over_past_rate_limited_deployments() {
        let base = serve().await;
        let vectors = backend(&base, "secret")
            .encode_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 1.0]]);
    }

    #[tokio::test]
    async fn authentication_failure_is_fatal() {
        let base = serve().await;
        let err = backend(&base, "wrong").encode_query("bar").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::Fatal(_)));
    }
}
