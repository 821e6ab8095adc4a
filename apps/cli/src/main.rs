//! FeatureLens CLI: research product features from their documentation.
//!
//! Scrapes a feature's documentation, follows relevant links, extracts
//! structured knowledge, and stores the result with sparse embeddings.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
