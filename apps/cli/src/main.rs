//! Expense tracker CLI: turns receipt images into categorized expense rows.
//!
//! Each receipt goes through OCR extraction, category classification, and
//! logging to a local warehouse table.

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
