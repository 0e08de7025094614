use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::index::{IndexError, LoadOutcome};
use crate::state::AppState;

pub async fn rebuild_index(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.index.rebuild().await.map_err(|err| match err {
        IndexError::RebuildInProgress => ApiError::ServiceUnavailable(err.to_string()),
        other => ApiError::internal(other),
    })?;

    let entries = match outcome {
        LoadOutcome::Loaded { entries } | LoadOutcome::Built { entries, .. } => entries,
    };
    Ok(Json(json!({
        "status": "rebuilt",
        "entries": entries,
        "dimensions": state.embedding.dimensions(),
    })))
}
