// main.rs

mod augment;
mod cli;
mod config;
mod controller;
mod embedder;
mod error;
mod generator;
mod image;
mod listing;
mod llm;
mod openai;
mod preferences;
#[cfg(test)]
mod testing;
mod ui;
mod vector_db;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.settings.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    cli::run(cli).await
}
