use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.index.index().snapshot();
    let generation = &state.settings.generation;

    Json(json!({
        "status": "ok",
        "started_at": state.started_at.to_rfc3339(),
        "corpus": {
            "examples": state.corpus.len(),
        },
        "index": {
            "entries": snapshot.len(),
            "dimensions": snapshot.dimensions(),
        },
        "embedding": {
            "provider": state.embedding.name(),
            "model": state.embedding.model(),
        },
        "generation": {
            "provider": generation.provider.as_str(),
            "model": generation.model,
        },
        "retrieval": {
            "top_k": state.settings.retrieval.top_k,
            "dedupe_by_config": state.settings.retrieval.dedupe_by_config,
        },
    }))
}
