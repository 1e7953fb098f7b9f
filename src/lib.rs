//! # a3s-relay
//!
//! OpenAI-compatible chat completions over pluggable model backends.
//!
//! ## Overview
//!
//! `a3s-relay` accepts Chat Completions requests, rebuilds the stateless
//! message list into a structured conversation of turns, runs a backend
//! once for the final user message, and streams the answer back as
//! `chat.completion.chunk` server-sent events terminated by `data: [DONE]`.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use a3s_relay::{reconstruct, ChatMessage, CompletionDriver, ModelRegistry, RelayConfig};
//! use a3s_relay::driver::RunRequest;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> a3s_relay::Result<()> {
//! let registry = ModelRegistry::from_config(&RelayConfig::default())?;
//! let model = registry.get("echo")?;
//!
//! let messages = vec![
//!     ChatMessage::new("user", "Hi"),
//!     ChatMessage::new("assistant", "Hello."),
//!     ChatMessage::new("user", "2+2?"),
//! ];
//! let history = reconstruct(&messages, true)?;
//!
//! let driver = CompletionDriver::new(16);
//! let stream = driver
//!     .run(
//!         model,
//!         RunRequest {
//!             history,
//!             prompt: "2+2?".to_string(),
//!             system_override: None,
//!             streaming: true,
//!             temperature: None,
//!         },
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! let (text, _usage) = stream.collect_text().await?;
//! assert_eq!(text, "2+2?");
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **echo**: answers with the user's prompt, word by word; needs nothing
//! - **openai**: forwards to any OpenAI-compatible `/chat/completions` upstream
//!
//! ## Architecture
//!
//! - **conversation**: message list to turns, and turns back to messages
//! - **Model** trait: the backend seam, one call per new user turn
//! - **CompletionDriver**: bounded, cancellable hand-off from backend to client
//! - **SseEncoder**: byte-exact chunk framing
//! - **server**: axum router mounting the `/v1` endpoints

pub mod api;
pub mod backend;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod dirs;
pub mod driver;
pub mod error;
pub mod server;

// Re-export core types
pub use api::sse::{encode_stream, SseEncoder};
pub use api::types::{ChatCompletionChunk, ChatCompletionRequest, ChatMessage, Usage};
pub use backend::types::{BackendEvent, Completion, ConversationRequest, FragmentStream};
pub use backend::{Model, ModelRegistry};
pub use config::{ModelConfig, ProviderKind, RelayConfig};
pub use conversation::{final_user_prompt, reconstruct, reconstruct_at, Conversation, Role, Turn};
pub use driver::{CompletionDriver, CompletionStream, DriverEvent};
pub use error::{RelayError, Result};
