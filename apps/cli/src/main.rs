//! PageLens CLI: scrape a set of web pages, extract structured data, analyze
//! and compare them, then ask follow-up questions over the stored results.

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
