// Upstream OpenAI-compatible backend.
//
// Flattens the reconstructed conversation back into a Chat Completions
// message list and forwards it to `<base_url>/chat/completions`. Streaming
// responses are parsed from the upstream SSE body into fragments. Requests
// are never retried.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::api::types::{ChatMessage, Usage};
use crate::conversation::Role;
use crate::error::{RelayError, Result};

use super::types::{BackendEvent, Completion, ConversationRequest};
use super::Model;

pub struct OpenAiModel {
    id: String,
    upstream_model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(
        id: impl Into<String>,
        upstream_model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            upstream_model: upstream_model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &ConversationRequest) -> serde_json::Value {
        let mut messages: Vec<ChatMessage> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage::new(Role::System.as_str(), system.as_str()));
        }
        messages.extend(request.history.to_messages());
        messages.push(ChatMessage::new(Role::User.as_str(), request.prompt.as_str()));

        let mut body = serde_json::json!({
            "model": self.upstream_model,
            "messages": messages,
            "stream": request.stream,
        });
        if request.stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }
}

// ============================================================================
// Upstream wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpstreamUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<UpstreamUsage> for Usage {
    fn from(u: UpstreamUsage) -> Self {
        Usage::new(u.prompt_tokens, u.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamResponse {
    choices: Vec<UpstreamChoice>,
    #[serde(default)]
    usage: Option<UpstreamUsage>,
}

#[derive(Debug, Deserialize)]
struct UpstreamChoice {
    message: UpstreamMessage,
}

#[derive(Debug, Deserialize)]
struct UpstreamMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamChunk {
    #[serde(default)]
    choices: Vec<UpstreamChunkChoice>,
    #[serde(default)]
    usage: Option<UpstreamUsage>,
}

#[derive(Debug, Deserialize)]
struct UpstreamChunkChoice {
    #[serde(default)]
    delta: Option<UpstreamDelta>,
}

#[derive(Debug, Deserialize)]
struct UpstreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Drop the `\r` of every `\r\n` pair. A trailing lone `\r` is kept until
/// the next chunk shows whether a `\n` follows.
fn normalize_crlf(buffer: &mut Vec<u8>) {
    let mut write = 0;
    for read in 0..buffer.len() {
        let byte = buffer[read];
        if byte == b'\r' && buffer.get(read + 1) == Some(&b'\n') {
            continue;
        }
        buffer[write] = byte;
        write += 1;
    }
    buffer.truncate(write);
}

/// Drain every complete SSE event from `buffer`, returning their `data` payloads.
///
/// Bytes are only decoded once a whole event has arrived, so characters
/// split across network reads come through intact.
fn drain_sse_data(buffer: &mut Vec<u8>) -> Result<Vec<String>> {
    normalize_crlf(buffer);
    let mut payloads = Vec::new();
    while let Some(event_end) = buffer.windows(2).position(|w| w == b"\n\n") {
        let event: Vec<u8> = buffer.drain(..event_end + 2).collect();
        let text = std::str::from_utf8(&event[..event_end])
            .map_err(|e| RelayError::Backend(format!("upstream sent invalid UTF-8: {e}")))?;
        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
    }
    Ok(payloads)
}

/// Parsed content of one upstream `data:` payload.
#[derive(Debug, PartialEq)]
enum UpstreamEvent {
    Done,
    Chunk {
        content: Option<String>,
        usage: Option<Usage>,
    },
}

fn parse_payload(data: &str) -> Result<UpstreamEvent> {
    if data == "[DONE]" {
        return Ok(UpstreamEvent::Done);
    }
    let chunk: UpstreamChunk = serde_json::from_str(data)
        .map_err(|e| RelayError::Backend(format!("malformed upstream chunk: {e}")))?;
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty());
    Ok(UpstreamEvent::Chunk {
        content,
        usage: chunk.usage.map(Usage::from),
    })
}

#[async_trait]
impl Model for OpenAiModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> &str {
        "openai"
    }

    async fn run_conversation(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<Completion> {
        let body = self.build_body(&request);
        let url = self.endpoint();

        let mut builder = self.client.post(url.as_str()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            model = %self.id,
            upstream = %self.upstream_model,
            stream = request.stream,
            "sending upstream request"
        );

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RelayError::Backend("request cancelled".to_string()));
            }
            response = builder.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RelayError::Backend(format!(
                "upstream {url} returned {status}: {text}"
            )));
        }

        if !request.stream {
            let parsed: UpstreamResponse = response.json().await?;
            let text = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            let usage = parsed.usage.map(Usage::from).unwrap_or_default();
            return Ok(Completion::Whole { text, usage });
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut usage = Usage::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let err: Result<BackendEvent> = Err(RelayError::from(e));
                        yield err;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                let payloads = match drain_sse_data(&mut buffer) {
                    Ok(payloads) => payloads,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for data in payloads {
                    match parse_payload(&data) {
                        Ok(UpstreamEvent::Done) => {
                            yield Ok(BackendEvent::Done(usage));
                            return;
                        }
                        Ok(UpstreamEvent::Chunk { content, usage: chunk_usage }) => {
                            if let Some(u) = chunk_usage {
                                usage = u;
                            }
                            if let Some(text) = content {
                                yield Ok(BackendEvent::Fragment(text));
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            yield Err(RelayError::Backend(
                "upstream stream ended without [DONE]".to_string(),
            ));
        };
        Ok(Completion::Streaming(Box::pin(stream)))
    }
}
