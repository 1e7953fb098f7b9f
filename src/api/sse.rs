use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::api::types::{ChatChunkChoice, ChatCompletionChunk, ChatDelta};
use crate::driver::DriverEvent;
use crate::error::{RelayError, Result};

/// The standard SSE termination marker used by OpenAI-compatible APIs.
pub const SSE_DONE: &str = "[DONE]";

/// Encodes `chat.completion.chunk` frames for one streamed response.
///
/// Every frame of a response shares the same id; `created` is taken at
/// encode time.
#[derive(Debug, Clone)]
pub struct SseEncoder {
    id: String,
    model: String,
}

impl SseEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("chatcmpl-{}", &hex[..12]),
            model: model.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Build the chunk envelope for one frame.
    pub fn chunk(
        &self,
        content: &str,
        role: Option<&str>,
        finish_reason: Option<&str>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: self.model.clone(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta {
                    content: content.to_string(),
                    role: role.map(str::to_string),
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    /// Encode one complete `data: <json>\n\n` frame.
    pub fn encode(&self, content: &str, role: Option<&str>, finish_reason: Option<&str>) -> Bytes {
        let chunk = self.chunk(content, role, finish_reason);
        // A struct of strings and integers always serializes.
        let json = serde_json::to_string(&chunk).unwrap_or_default();
        Bytes::from(format!("data: {json}\n\n"))
    }

    /// Leading frame announcing the assistant role.
    pub fn role_frame(&self) -> Bytes {
        self.encode("", Some("assistant"), None)
    }

    pub fn content_frame(&self, fragment: &str) -> Bytes {
        self.encode(fragment, None, None)
    }

    /// Trailing frame carrying the finish reason.
    pub fn finish_frame(&self, reason: &str) -> Bytes {
        self.encode("", None, Some(reason))
    }

    pub fn done_frame(&self) -> Bytes {
        Bytes::from_static(b"data: [DONE]\n\n")
    }
}

/// Turn a completion's events into the full SSE frame sequence: one role
/// frame, one frame per fragment, a `stop` finish frame, then `[DONE]`.
///
/// An error ends the sequence right after it is yielded, without a finish
/// frame or `[DONE]`, so clients can tell a truncated stream from a
/// complete one. Events that run out before `Done` count as an error.
pub fn encode_stream<S>(encoder: SseEncoder, events: S) -> impl Stream<Item = Result<Bytes>>
where
    S: Stream<Item = Result<DriverEvent>> + Send + Unpin + 'static,
{
    async_stream::stream! {
        let mut events = events;
        let first: Result<Bytes> = Ok(encoder.role_frame());
        yield first;

        let mut fragments = 0usize;
        let mut completed = false;
        while let Some(event) = events.next().await {
            match event {
                Ok(DriverEvent::Fragment(text)) => {
                    fragments += 1;
                    yield Ok(encoder.content_frame(&text));
                }
                Ok(DriverEvent::Done(usage)) => {
                    completed = true;
                    tracing::info!(
                        id = %encoder.id(),
                        fragments,
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "completion finished"
                    );
                }
                Err(e) => {
                    tracing::error!(id = %encoder.id(), fragments, "stream aborted: {e}");
                    yield Err(e);
                    return;
                }
            }
        }

        if !completed {
            tracing::error!(id = %encoder.id(), fragments, "events ended before completion");
            yield Err(RelayError::Backend(
                "backend stream ended before completion".to_string(),
            ));
            return;
        }

        yield Ok(encoder.finish_frame("stop"));
        yield Ok(encoder.done_frame());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::Usage;

    fn parse_frame(frame: &[u8]) -> serde_json::Value {
        let text = std::str::from_utf8(frame).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|t| t.strip_suffix("\n\n"))
            .expect("frame must be `data: <json>\\n\\n`");
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_role_frame() {
        let encoder = SseEncoder::new("echo");
        let value = parse_frame(&encoder.role_frame());
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["model"], "echo");
        assert!(value["id"].is_string());
        assert!(value["created"].as_i64().unwrap() > 0);
        assert_eq!(value["choices"][0]["index"], 0);
        assert_eq!(value["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(value["choices"][0]["delta"]["content"], "");
        assert!(value["choices"][0].get("finish_reason").is_none());
    }

    #[test]
    fn test_content_frame_has_no_role() {
        let encoder = SseEncoder::new("echo");
        let value = parse_frame(&encoder.content_frame("4"));
        assert_eq!(value["choices"][0]["delta"]["content"], "4");
        assert!(value["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn test_finish_frame() {
        let encoder = SseEncoder::new("echo");
        let value = parse_frame(&encoder.finish_frame("stop"));
        assert_eq!(value["choices"][0]["delta"]["content"], "");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_done_frame_is_exact() {
        let encoder = SseEncoder::new("echo");
        assert_eq!(&encoder.done_frame()[..], b"data: [DONE]\n\n");
    }

    #[test]
    fn test_id_is_stable_per_encoder() {
        let encoder = SseEncoder::new("echo");
        let a = parse_frame(&encoder.role_frame());
        let b = parse_frame(&encoder.finish_frame("stop"));
        assert_eq!(a["id"], b["id"]);
        assert!(encoder.id().starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn test_encode_stream_framing() {
        for k in [0usize, 1, 5] {
            let mut events: Vec<Result<DriverEvent>> = (0..k)
                .map(|i| Ok(DriverEvent::Fragment(format!("f{i}"))))
                .collect();
            events.push(Ok(DriverEvent::Done(Usage::new(1, k as u32))));

            let frames: Vec<Bytes> =
                encode_stream(SseEncoder::new("m"), futures::stream::iter(events))
                    .map(|f| f.unwrap())
                    .collect()
                    .await;

            assert_eq!(frames.len(), k + 3);
            let first = parse_frame(&frames[0]);
            assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
            for i in 0..k {
                let value = parse_frame(&frames[i + 1]);
                assert_eq!(value["choices"][0]["delta"]["content"], format!("f{i}"));
                assert!(value["choices"][0]["delta"].get("role").is_none());
            }
            let finish = parse_frame(&frames[k + 1]);
            assert_eq!(finish["choices"][0]["finish_reason"], "stop");
            assert_eq!(&frames[k + 2][..], b"data: [DONE]\n\n");
        }
    }

    #[tokio::test]
    async fn test_encode_stream_without_done_truncates() {
        let events: Vec<Result<DriverEvent>> =
            vec![Ok(DriverEvent::Fragment("partial".to_string()))];
        let items: Vec<Result<Bytes>> =
            encode_stream(SseEncoder::new("m"), futures::stream::iter(events))
                .collect()
                .await;

        assert_eq!(items.len(), 3);
        assert!(items[..2].iter().all(|item| item.is_ok()));
        assert!(matches!(&items[2], Err(RelayError::Backend(m)) if m.contains("before completion")));
    }

    #[tokio::test]
    async fn test_encode_stream_error_truncates() {
        let events: Vec<Result<DriverEvent>> = vec![
            Ok(DriverEvent::Fragment("partial".to_string())),
            Err(RelayError::Backend("lost upstream".to_string())),
            Ok(DriverEvent::Fragment("never sent".to_string())),
        ];
        let items: Vec<Result<Bytes>> =
            encode_stream(SseEncoder::new("m"), futures::stream::iter(events))
                .collect()
                .await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(RelayError::Backend(_))));
    }
}
