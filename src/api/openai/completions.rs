use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::{RelayError, Result};

/// POST /v1/completions - legacy text completion.
///
/// Not translated: the body is logged and acknowledged so clients probing
/// the endpoint can be inspected.
pub async fn handler(
    payload: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>> {
    let Json(body) = payload.map_err(|e| RelayError::InvalidRequest(e.body_text()))?;
    let pretty = serde_json::to_string_pretty(&body)?;
    tracing::info!("Received legacy completion request:\n{pretty}");
    Ok(Json(serde_json::json!({ "message": "Request captured" })))
}
