//! flotillactl - operator CLI for the flotilla cluster.
//!
//! Talks directly to the key-value registry: submitting units, flipping
//! target states and inspecting cluster state.

use anyhow::Result;
use clap::Parser;

mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
