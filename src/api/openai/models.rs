use axum::extract::State;
use axum::Json;

use crate::api::types::{ModelInfo, ModelList};
use crate::server::state::AppState;

/// GET /v1/models - OpenAI-compatible model listing.
pub async fn handler(State(state): State<AppState>) -> Json<ModelList> {
    let data = state
        .registry
        .list()
        .iter()
        .map(|m| ModelInfo {
            id: m.id().to_string(),
            object: "model".to_string(),
            created: state.started_at,
            owned_by: m.provider().to_string(),
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}
