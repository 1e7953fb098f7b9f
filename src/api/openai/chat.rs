use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::sync::CancellationToken;

use crate::api::sse::{encode_stream, SseEncoder};
use crate::api::types::{ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::conversation::export::{self, ConversationRecord};
use crate::conversation::{self, Conversation, Role};
use crate::driver::{CompletionStream, RunRequest};
use crate::error::{RelayError, Result};
use crate::server::state::AppState;

/// POST /v1/chat/completions - OpenAI-compatible chat completion.
///
/// Streams `chat.completion.chunk` frames. Non-streaming requests are
/// rejected unless `streaming_only` is turned off, in which case they get a
/// single `chat.completion` object.
///
/// `stream` and `temperature` are optional in the body. An absent `stream`
/// is treated as `false`, so such requests are rejected in a streaming-only
/// deployment.
pub async fn handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    match handle(state, payload).await {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!("chat completion failed: {e}");
            } else {
                tracing::warn!("chat completion rejected: {e}");
            }
            e.into_response()
        }
    }
}

async fn handle(
    state: AppState,
    payload: std::result::Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload.map_err(|e| RelayError::InvalidRequest(e.body_text()))?;

    if request.messages.is_empty() {
        return Err(RelayError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    if !request.stream && state.config.streaming_only {
        return Err(RelayError::InvalidRequest(
            "Only streaming is supported".to_string(),
        ));
    }

    let model = state.registry.get(&request.model)?;
    let prompt = conversation::final_user_prompt(&request.messages)?.to_string();
    let history = conversation::reconstruct(&request.messages, true)?;
    tracing::info!(
        model = %request.model,
        messages = request.messages.len(),
        turns = history.len(),
        stream = request.stream,
        "conversation reconstructed"
    );

    if let Some(dir) = state.config.capture_dir.clone() {
        capture(&request.model, &history, dir);
    }

    let completion = state
        .driver
        .run(
            model,
            RunRequest {
                history,
                prompt,
                system_override: None,
                streaming: request.stream,
                temperature: request.temperature,
            },
            CancellationToken::new(),
        )
        .await?;

    if request.stream {
        stream_response(&request.model, completion)
    } else {
        whole_response(&request.model, completion).await
    }
}

fn stream_response(model: &str, completion: CompletionStream) -> Result<Response> {
    let frames = encode_stream(SseEncoder::new(model), completion);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames))
        .map_err(|e| RelayError::Server(e.to_string()))
}

async fn whole_response(model: &str, completion: CompletionStream) -> Result<Response> {
    let (text, usage) = completion.collect_text().await?;
    let hex = uuid::Uuid::new_v4().simple().to_string();
    let response = ChatCompletionResponse {
        id: format!("chatcmpl-{}", &hex[..12]),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::new(Role::Assistant.as_str(), text),
            finish_reason: Some("stop".to_string()),
        }],
        usage,
    };
    Ok(Json(response).into_response())
}

/// Write the reconstructed history to `dir` off the request path.
fn capture(model: &str, history: &Conversation, dir: std::path::PathBuf) {
    let record = ConversationRecord::new(model, history);
    tokio::task::spawn_blocking(move || match export::write_json(&record, &dir) {
        Ok(path) => tracing::debug!(path = %path.display(), "conversation captured"),
        Err(e) => tracing::warn!(dir = %dir.display(), "failed to capture conversation: {e}"),
    });
}
