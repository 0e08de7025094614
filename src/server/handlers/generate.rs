use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::generator::ConfigResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub description: String,
    #[serde(default)]
    pub headers: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Always answers 200; failures are reported inside the envelope.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Json<ConfigResult> {
    let span = tracing::info_span!("generate", request_id = %Uuid::new_v4());
    let result = state
        .generator
        .generate_config(
            &request.description,
            request.headers.as_deref(),
            request.temperature.unwrap_or(0.0),
        )
        .instrument(span)
        .await;
    Json(result)
}
