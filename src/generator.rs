//! The single entry point the server calls: description in, chart
//! configuration envelope out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{GenerationBackend, GenerationFailure};
use crate::prompt::PromptBuilder;
use crate::retrieval::{RetrievalError, Retriever, DEFAULT_TOP_K};

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("{0}")]
    Generation(#[from] GenerationFailure),
    #[error("model output is not a valid JSON configuration: {0}")]
    InvalidGeneration(String),
}

/// Result envelope returned for every request. `description` and `headers`
/// always echo the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigResult {
    pub success: bool,
    pub description: String,
    pub headers: Option<String>,
    pub config: Option<Value>,
    pub error: Option<String>,
}

impl ConfigResult {
    fn from_outcome(
        description: &str,
        headers: Option<&str>,
        outcome: Result<Value, GenerateError>,
    ) -> Self {
        let (config, error) = match outcome {
            Ok(config) => (Some(config), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            success: config.is_some(),
            description: description.to_string(),
            headers: headers.map(str::to_string),
            config,
            error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub top_k: usize,
    pub max_retries: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Retriever, prompt builder and generation backend composed in order.
/// Holds only read-only collaborators, so one instance serves concurrent
/// requests.
pub struct ConfigGenerator {
    retriever: Retriever,
    prompts: PromptBuilder,
    backend: Arc<dyn GenerationBackend>,
    options: GeneratorOptions,
}

impl ConfigGenerator {
    pub fn new(
        retriever: Retriever,
        prompts: PromptBuilder,
        backend: Arc<dyn GenerationBackend>,
        options: GeneratorOptions,
    ) -> Self {
        Self {
            retriever,
            prompts,
            backend,
            options,
        }
    }

    /// Never fails: every error is folded into the envelope.
    pub async fn generate_config(
        &self,
        description: &str,
        headers: Option<&str>,
        temperature: f32,
    ) -> ConfigResult {
        let outcome = self.try_generate(description, headers, temperature).await;
        match &outcome {
            Ok(_) => info!("Generated configuration for {:?}", truncate(description)),
            Err(err) => warn!("Generation for {:?} failed: {}", truncate(description), err),
        }
        ConfigResult::from_outcome(description, headers, outcome)
    }

    pub async fn try_generate(
        &self,
        description: &str,
        headers: Option<&str>,
        temperature: f32,
    ) -> Result<Value, GenerateError> {
        if description.trim().is_empty() {
            return Err(GenerateError::InvalidInput(
                "description must not be empty".to_string(),
            ));
        }
        if !temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(GenerateError::InvalidInput(format!(
                "temperature must be between 0 and {}",
                MAX_TEMPERATURE
            )));
        }

        let examples = self
            .retriever
            .retrieve(description, self.options.top_k)
            .await?;
        let prompt = self.prompts.build(description, headers, &examples);
        let raw = self
            .backend
            .generate(&prompt, temperature, self.options.max_retries)
            .await?;

        parse_config(&raw)
    }
}

/// Parses model output as a JSON object, unwrapping a surrounding markdown
/// code fence if present.
pub fn parse_config(raw: &str) -> Result<Value, GenerateError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(GenerateError::InvalidGeneration(
            "model returned an empty response".to_string(),
        ));
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(GenerateError::InvalidGeneration(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(err) => Err(GenerateError::InvalidGeneration(err.to_string())),
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches("json"),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 80;
    if text.chars().count() <= LIMIT {
        return text.to_string();
    }
    let mut out: String = text.chars().take(LIMIT).collect();
    out.push_str("...");
    out
}
