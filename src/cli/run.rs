use std::io::Write;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backend::ModelRegistry;
use crate::config::RelayConfig;
use crate::conversation::Conversation;
use crate::driver::{CompletionDriver, DriverEvent, RunRequest};
use crate::error::Result;

/// Execute the `run` command: send one prompt and print the answer as it streams.
pub async fn execute(
    config: &RelayConfig,
    model: &str,
    prompt: &str,
    system: Option<&str>,
    temperature: Option<f32>,
) -> Result<()> {
    let registry = ModelRegistry::from_config(config)?;
    let model = registry.get(model)?;
    tracing::info!(model = model.id(), provider = model.provider(), "Running prompt");

    let driver = CompletionDriver::new(config.channel_capacity);
    let cancel = CancellationToken::new();
    let mut stream = driver
        .run(
            model,
            RunRequest {
                history: Conversation::default(),
                prompt: prompt.to_string(),
                system_override: system.map(str::to_string),
                streaming: true,
                temperature,
            },
            cancel.clone(),
        )
        .await?;

    let mut stdout = std::io::stdout();
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                println!();
                return Ok(());
            }
            event = stream.next() => event,
        };
        match event {
            Some(Ok(DriverEvent::Fragment(text))) => {
                print!("{text}");
                stdout.flush()?;
            }
            Some(Ok(DriverEvent::Done(usage))) => {
                tracing::info!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Completion finished"
                );
            }
            Some(Err(e)) => {
                println!();
                return Err(e);
            }
            None => break,
        }
    }
    println!();
    Ok(())
}
