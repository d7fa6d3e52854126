//! Dossier CLI: turn a question about companies into a researched answer.
//!
//! Runs the dossier team (search, extract, store, synthesize) against the
//! configured completion service, search provider and company store.

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
