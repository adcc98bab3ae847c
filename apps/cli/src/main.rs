//! augur CLI: run symbolic-framework agents and pipelines from the terminal.
//!
//! Validates requests against the agent contract, executes them through the
//! cached pipeline executor and prints the final answer with per-stage outcomes.

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
