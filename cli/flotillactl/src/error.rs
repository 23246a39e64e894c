//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Unit not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Registry error: {0}")]
    Registry(#[from] flotilla_engine::registry::RegistryError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::NotFound(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: `flotillactl list-units` shows every submitted unit.".yellow()
                );
            }
            CliError::Registry(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: check the store endpoint (--endpoint or FLOTILLA_ETCD_ENDPOINT)."
                        .yellow()
                );
            }
            _ => {}
        }
    }
}
