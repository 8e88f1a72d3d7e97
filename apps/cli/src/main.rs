//! Postforge CLI: keyword-to-published-article pipeline.
//!
//! Generates an article from a keyword and title, injects related internal
//! links, assembles the final HTML with structured data, and publishes it.

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
