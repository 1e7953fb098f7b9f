use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_relay::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `run` output stays clean on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            cli::serve::execute(config, host, port).await?;
        }
        Commands::Models => {
            cli::models::execute(&config);
        }
        Commands::Run {
            model,
            prompt,
            system,
            temperature,
        } => {
            cli::run::execute(&config, &model, &prompt, system.as_deref(), temperature).await?;
        }
    }

    Ok(())
}
