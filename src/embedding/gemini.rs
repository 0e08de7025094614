use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_vectors, ensure_non_empty, EmbeddingBackend, EmbeddingResult};
use crate::llm::ProviderError;

/// `batchEmbedContents` accepts at most this many requests per call.
const MAX_BATCH: usize = 100;

/// Gemini embeddings with asymmetric task types: documents are embedded as
/// `RETRIEVAL_DOCUMENT`, queries as `RETRIEVAL_QUERY`.
pub struct GeminiEmbeddingBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

impl GeminiEmbeddingBackend {
    pub fn new(
        client: Client,
        base_url: String,
        api_key: String,
        model: String,
        dimensions: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
            batch_size: batch_size.clamp(1, MAX_BATCH),
        }
    }

    fn content_request<'a>(&self, text: &'a str, task_type: &'static str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: format!("models/{}", self.model),
            content: Content {
                parts: [Part { text }],
            },
            task_type,
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> EmbeddingResult<R> {
        let url = format!("{}/v1beta/models/{}:{}", self.base_url, self.model, method);
        let res = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &text).into());
        }
        Ok(res.json().await.map_err(ProviderError::from_transport)?)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingBackend {
    fn name(&self) -> &str {
        "gemini"
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
            let body = BatchEmbedRequest {
                requests: chunk
                    .iter()
                    .map(|text| self.content_request(text, "RETRIEVAL_DOCUMENT"))
                    .collect(),
            };
            let payload: BatchEmbedResponse = self.post("batchEmbedContents", &body).await?;
            let batch = payload.embeddings.into_iter().map(|e| e.values).collect();
            vectors.extend(check_vectors(chunk.len(), self.dimensions, batch)?);
        }
        Ok(vectors)
    }

    async fn encode_query(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        ensure_non_empty([text])?;
        let body = self.content_request(text, "RETRIEVAL_QUERY");
        let payload: EmbedContentResponse = self.post("embedContent", &body).await?;
        let mut vectors = check_vectors(1, self.dimensions, vec![payload.embedding.values])?;
        Ok(vectors.remove(0))
    }
}
