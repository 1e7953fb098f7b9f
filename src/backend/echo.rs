// Local echo backend.
//
// Answers every turn with the user's own prompt, streamed one word at a time.
// It needs no network or model files, so it is the default model and the
// one used for smoke tests.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::types::Usage;
use crate::error::Result;

use super::types::{BackendEvent, Completion, ConversationRequest};
use super::Model;

pub struct EchoModel {
    id: String,
}

impl EchoModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Whitespace-delimited word count, standing in for a tokenizer.
fn count_words(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

fn prompt_tokens(request: &ConversationRequest) -> u32 {
    let history: u32 = request
        .history
        .to_messages()
        .iter()
        .map(|m| count_words(&m.content))
        .sum();
    let system = request.system.as_deref().map(count_words).unwrap_or(0);
    history + system + count_words(&request.prompt)
}

#[async_trait]
impl Model for EchoModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> &str {
        "echo"
    }

    async fn run_conversation(
        &self,
        request: ConversationRequest,
        cancel: CancellationToken,
    ) -> Result<Completion> {
        let usage = Usage::new(prompt_tokens(&request), count_words(&request.prompt));
        tracing::debug!(
            model = %self.id,
            history_turns = request.history.len(),
            stream = request.stream,
            "echo backend invoked"
        );

        if !request.stream {
            return Ok(Completion::Whole {
                text: request.prompt,
                usage,
            });
        }

        let prompt = request.prompt;
        let stream = async_stream::stream! {
            for word in prompt.split_inclusive(' ') {
                if cancel.is_cancelled() {
                    return;
                }
                let fragment: Result<BackendEvent> = Ok(BackendEvent::Fragment(word.to_string()));
                yield fragment;
                tokio::task::yield_now().await;
            }
            let done: Result<BackendEvent> = Ok(BackendEvent::Done(usage));
            yield done;
        };
        Ok(Completion::Streaming(Box::pin(stream)))
    }
}
