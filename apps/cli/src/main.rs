//! corpusforge CLI: build training corpora from web pages and Q&A dumps.
//!
//! Runs one of the streaming extraction pipelines and writes its dataset
//! file, then hands the file to an external analysis tool.

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
