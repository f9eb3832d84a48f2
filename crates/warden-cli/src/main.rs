mod bootstrap_helpers;
mod cli_args;
mod commands;
mod tools;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    commands::run_cli(cli).await
}
