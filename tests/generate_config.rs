use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use vizgen_backend::core::config::{AppPaths, Settings};
use vizgen_backend::embedding::{EmbeddingBackend, EmbeddingError, EmbeddingResult};
use vizgen_backend::generator::ConfigResult;
use vizgen_backend::index::IndexError;
use vizgen_backend::llm::{GenerationBackend, GenerationFailure};
use vizgen_backend::server::router::router;
use vizgen_backend::state::error::InitializationError;
use vizgen_backend::state::AppState;

const KEYWORDS: [&str; 6] = ["bar", "line", "scatter", "heatmap", "blue", "pie"];

/// Counts keyword occurrences, padded out to the configured width.
struct KeywordEmbedder {
    dimensions: usize,
}

impl KeywordEmbedder {
    fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0; self.dimensions];
        for (slot, keyword) in KEYWORDS.iter().enumerate() {
            v[slot] = lower.matches(keyword).count() as f32;
        }
        v[self.dimensions - 1] += 0.1;
        v
    }
}

#[async_trait]
impl EmbeddingBackend for KeywordEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        "keywords"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn encode_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    async fn encode_query(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.vector(text))
    }
}

/// Replies with a fixed text and keeps every prompt it was given.
/// Replies with a fixed string, or with the configuration of the top
/// retrieved example when built with `echoing`.
struct CannedModel {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl CannedModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn echoing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for CannedModel {
    async fn generate(
        &self,
        prompt: &str,
        _temperature: f32,
        _max_retries: usize,
    ) -> Result<String, GenerationFailure> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone().unwrap_or_else(|| first_answer(prompt)))
    }
}

/// The first `Answer:` block under `## Examples`, fenced the way chat models
/// tend to reply. Empty when nothing was retrieved.
fn first_answer(prompt: &str) -> String {
    let Some(examples) = prompt.find("## Examples").map(|at| &prompt[at..]) else {
        return String::new();
    };
    let examples = examples.split("\n## Request").next().unwrap_or_default();
    let Some(answer) = examples.find("Answer: ").map(|at| &examples[at + "Answer: ".len()..]) else {
        return String::new();
    };
    let block = answer.split("\nEnglish Text:").next().unwrap_or_default();
    format!("```json\n{}\n```", block.trim())
}

fn write_fixtures(root: &Path) {
    let data = root.join("data");
    std::fs::create_dir_all(&data).unwrap();
    let examples = json!([
        {
            "id": 0, "type": "Line",
            "description": "Line chart of temperature over time",
            "config": { "graphType": "Line", "xAxisTitle": "Time" },
            "headers": "Time,Temperature", "source": "human"
        },
        {
            "id": 1, "type": "Bar",
            "description": "Bar chart with blue bars",
            "config": { "graphType": "Bar", "colors": ["blue"] },
            "headers": "Region,Sales", "source": "human"
        },
        {
            "id": 2, "type": "Scatter2D",
            "description": "Scatter plot of height against weight",
            "config": { "graphType": "Scatter2D" },
            "headers": null, "source": "human"
        },
        {
            "id": 3, "type": "Heatmap",
            "description": "Clustered heatmap of gene expression",
            "config": { "graphType": "Heatmap", "samplesClustered": true },
            "headers": "Gene,Sample1", "source": "human"
        },
        {
            "id": 4, "type": "Bar",
            "description": "Blue bar graph",
            "config": { "graphType": "Bar", "colors": ["blue"] },
            "headers": "Region,Sales", "source": "generated", "original_id": 1
        }
    ]);
    std::fs::write(
        data.join("few_shot_examples.json"),
        serde_json::to_string_pretty(&examples).unwrap(),
    )
    .unwrap();
    std::fs::write(data.join("schema.md"), "graphType: chart kind").unwrap();
    std::fs::write(data.join("prompt_rules.md"), "Answer with JSON only.").unwrap();
}

fn settings(tmp: &TempDir, paths: &AppPaths, dimensions: usize, rebuild: bool) -> Settings {
    let config = json!({
        "index": {
            "path": tmp.path().join("index.db").to_string_lossy(),
            "rebuild": rebuild
        },
        "embedding": { "provider": "local", "model": "keywords", "dimensions": dimensions },
        "generation": { "provider": "gemini" },
        "credentials": { "google_api_key": "test-key" }
    });
    Settings::resolve(&config, paths).unwrap()
}

async fn assemble(
    tmp: &TempDir,
    dimensions: usize,
    rebuild: bool,
    model: Arc<CannedModel>,
) -> Result<Arc<AppState>, InitializationError> {
    let paths = Arc::new(AppPaths::with_dirs(
        tmp.path().to_path_buf(),
        tmp.path().join("user"),
    ));
    let settings = settings(tmp, &paths, dimensions, rebuild);
    AppState::assemble(
        paths,
        settings,
        Arc::new(KeywordEmbedder { dimensions }),
        model,
    )
    .await
}

fn fixture_dir() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    write_fixtures(tmp.path());
    tmp
}

#[tokio::test]
async fn bar_chart_request_produces_a_bar_config() {
    let tmp = fixture_dir();
    let model = CannedModel::echoing();
    let state = assemble(&tmp, 16, false, model.clone()).await.unwrap();

    let result = state
        .generator
        .generate_config("Create a bar chart with blue bars", None, 0.0)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.error, None);
    assert_eq!(
        result.config.unwrap(),
        json!({ "graphType": "Bar", "colors": ["blue"] })
    );

    let prompt = &model.prompts()[0];
    let examples = &prompt[prompt.find("## Examples").unwrap()..];
    let first = examples.lines().nth(2).unwrap();
    assert!(first.contains("English Text: Bar chart with blue bars;"), "{first}");
    assert!(prompt.ends_with("Headers/Column Names: , Answer:"));
}

#[tokio::test]
async fn identical_requests_build_identical_prompts() {
    let tmp = fixture_dir();
    let model = CannedModel::new("{\"graphType\": \"Heatmap\"}");
    let state = assemble(&tmp, 16, false, model.clone()).await.unwrap();

    let first = state
        .generator
        .generate_config("heatmap of genes", Some("Gene,Sample1"), 0.0)
        .await;
    let second = state
        .generator
        .generate_config("heatmap of genes", Some("Gene,Sample1"), 0.0)
        .await;

    assert_eq!(first, second);
    let prompts = model.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], prompts[1]);
}

#[tokio::test]
async fn non_json_output_is_reported_in_the_envelope() {
    let tmp = fixture_dir();
    let model = CannedModel::new("Sure! Here is a bar chart for you.");
    let state = assemble(&tmp, 16, false, model).await.unwrap();

    let result = state
        .generator
        .generate_config("Create a bar chart", Some("Region,Sales"), 0.0)
        .await;

    assert!(!result.success);
    assert!(result.config.is_none());
    assert_eq!(result.description, "Create a bar chart");
    assert_eq!(result.headers.as_deref(), Some("Region,Sales"));
    assert!(result.error.unwrap().contains("not a valid JSON"));
}

#[tokio::test]
async fn invalid_input_never_reaches_the_model() {
    let tmp = fixture_dir();
    let model = CannedModel::new("{}");
    let state = assemble(&tmp, 16, false, model.clone()).await.unwrap();

    let empty = state.generator.generate_config("   ", None, 0.0).await;
    let too_hot = state.generator.generate_config("bar chart", None, 3.5).await;
    let nan = state.generator.generate_config("bar chart", None, f32::NAN).await;

    for result in [empty, too_hot, nan] {
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("invalid input"));
    }
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn index_built_at_one_width_is_rejected_at_another() {
    let tmp = fixture_dir();

    let state = assemble(&tmp, 768, false, CannedModel::new("{}")).await.unwrap();
    assert_eq!(state.index.index().len(), 5);
    drop(state);

    let err = assemble(&tmp, 1024, false, CannedModel::new("{}"))
        .await
        .err()
        .unwrap();
    match err {
        InitializationError::Index(IndexError::DimensionMismatch { index, backend }) => {
            assert_eq!(index, 768);
            assert_eq!(backend, 1024);
        }
        other => panic!("unexpected error: {other}"),
    }

    let rebuilt = assemble(&tmp, 1024, true, CannedModel::new("{}")).await.unwrap();
    assert_eq!(rebuilt.index.index().dimensions(), 1024);
}

#[tokio::test]
async fn persisted_index_is_reused_on_restart() {
    let tmp = fixture_dir();
    let first = assemble(&tmp, 16, false, CannedModel::new("{}")).await.unwrap();
    drop(first);

    let second = assemble(&tmp, 16, false, CannedModel::new("{}")).await.unwrap();
    assert_eq!(second.index.index().len(), 5);
    assert_eq!(second.corpus.len(), 5);
}

async fn serve(state: Arc<AppState>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn http_generate_answers_200_for_success_and_failure() {
    let tmp = fixture_dir();
    let state = assemble(&tmp, 16, false, CannedModel::new("{\"graphType\": \"Bar\"}"))
        .await
        .unwrap();
    let addr = serve(state).await;
    let client = reqwest::Client::new();

    let ok = client
        .post(format!("http://{addr}/api/generate"))
        .json(&json!({ "description": "bar chart", "headers": "Region,Sales" }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: ConfigResult = ok.json().await.unwrap();
    assert!(body.success);
    assert_eq!(body.config.unwrap()["graphType"], "Bar");
    assert_eq!(body.headers.as_deref(), Some("Region,Sales"));

    let failed = client
        .post(format!("http://{addr}/api/generate"))
        .json(&json!({ "description": "bar chart", "temperature": 9.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(failed.status(), 200);
    let body: Value = failed.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["config"], Value::Null);
    assert!(body["error"].as_str().unwrap().contains("temperature"));
}

#[tokio::test]
async fn http_status_and_rebuild_report_the_index() {
    let tmp = fixture_dir();
    let state = assemble(&tmp, 16, false, CannedModel::new("{}")).await.unwrap();
    let addr = serve(state).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: Value = client
        .get(format!("http://{addr}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["corpus"]["examples"], 5);
    assert_eq!(status["index"]["entries"], 5);
    assert_eq!(status["index"]["dimensions"], 16);
    assert_eq!(status["generation"]["provider"], "gemini");

    let rebuild = client
        .post(format!("http://{addr}/api/index/rebuild"))
        .send()
        .await
        .unwrap();
    assert_eq!(rebuild.status(), 200);
    let body: Value = rebuild.json().await.unwrap();
    assert_eq!(body["entries"], 5);
}
