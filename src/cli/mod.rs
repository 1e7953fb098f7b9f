pub mod models;
pub mod run;
pub mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::RelayConfig;
use crate::error::Result;

/// A3S Relay - OpenAI-compatible chat completions over pluggable backends
#[derive(Debug, Parser)]
#[command(name = "a3s-relay", version, about)]
pub struct Cli {
    /// Path to a config file (default: ~/.a3s/relay/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host address to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List configured models
    Models,

    /// Send a single prompt to a model and stream the answer
    Run {
        /// Model id to run (e.g. "echo")
        model: String,

        /// Prompt text
        prompt: String,

        /// System instruction for this turn
        #[arg(long)]
        system: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f32>,
    },
}

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => RelayConfig::load_from(path),
        None => {
            let config = RelayConfig::load()?;
            config.validate()?;
            Ok(config)
        }
    }
}
