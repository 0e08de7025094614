use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{
    check_vectors, ensure_non_empty, EmbeddingBackend, EmbeddingResult, OpenAiEmbeddingResponse,
};
use crate::llm::ProviderError;

/// Embeddings from a locally hosted model behind an OpenAI-compatible
/// `/v1/embeddings` route (llama.cpp server, LM Studio, text-embeddings-inference).
pub struct LocalEmbeddingBackend {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    query_instruction: Option<String>,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

impl LocalEmbeddingBackend {
    pub fn new(
        client: Client,
        endpoint: String,
        model: String,
        dimensions: usize,
        query_instruction: Option<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            endpoint,
            model,
            dimensions,
            query_instruction,
            batch_size: batch_size.max(1),
        }
    }

    async fn request(&self, input: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
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

    fn query_text(&self, text: &str) -> String {
        match &self.query_instruction {
            Some(instruction) => format!("{}{}", instruction, text),
            None => text.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for LocalEmbeddingBackend {
    fn name(&self) -> &str {
        "local"
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
        let input = [self.query_text(text)];
        let mut vectors = self.request(&input).await?;
        Ok(vectors.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    async fn serve(seen: Arc<Mutex<Vec<Value>>>) -> String {
        let router = Router::new().route(
            "/v1/embeddings",
            post(move |Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(body.clone());
                    let inputs = body["input"].as_array().cloned().unwrap_or_default();
                    let data: Vec<Value> = inputs
                        .iter()
                        .enumerate()
                        .rev()
                        .map(|(i, text)| {
                            let len = text.as_str().unwrap_or_default().len() as f32;
                            json!({ "embedding": [len, 1.0, 0.0], "index": i })
                        })
                        .collect();
                    Json(json!({ "data": data }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1/embeddings", addr)
    }

    #[tokio::test]
    async fn batches_preserve_input_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let endpoint = serve(seen.clone()).await;
        let backend =
            LocalEmbeddingBackend::new(Client::new(), endpoint, "bge-m3".into(), 3, None, 2);

        let texts: Vec<String> = ["a", "bb", "ccc"].iter().map(|s| s.to_string()).collect();
        let vectors = backend.encode_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0][0], 1.0);
        assert_eq!(vectors[1][0], 2.0);
        assert_eq!(vectors[2][0], 3.0);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn query_instruction_is_prefixed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let endpoint = serve(seen.clone()).await;
        let backend = LocalEmbeddingBackend::new(
            Client::new(),
            endpoint,
            "bge-m3".into(),
            3,
            Some("query: ".into()),
            8,
        );

        backend.encode_query("bar chart").await.unwrap();

        assert_eq!(seen.lock().unwrap()[0]["input"], json!(["query: bar chart"]));
    }

    #[tokio::test]
    async fn wrong_width_is_malformed() {
        let endpoint = serve(Arc::new(Mutex::new(Vec::new()))).await;
        let backend =
            LocalEmbeddingBackend::new(Client::new(), endpoint, "bge-m3".into(), 1024, None, 8);

        let err = backend.encode_query("bar chart").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Malformed(_)));
    }
}
