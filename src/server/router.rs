use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::server::handlers::{generate, health, index};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route("/api/generate", post(generate::generate))
        .route("/api/index/rebuild", post(index::rebuild_index))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
