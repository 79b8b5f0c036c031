//! regraph CLI — regulatory-site ingestion into a knowledge graph.
//!
//! Consumes fetched-resource manifests produced by an external crawler and
//! assembles an idempotent graph of pages, documents, chunks, and entities.

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
