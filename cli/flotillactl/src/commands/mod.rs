//! CLI commands.

mod machines;
mod units;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use flotilla_engine::kv::EtcdClient;
use flotilla_engine::registry::Registry;

use crate::output::OutputFormat;

/// flotilla CLI - declare and inspect units across the cluster.
#[derive(Debug, Parser)]
#[command(name = "flotillactl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Key-value store endpoint.
    #[arg(
        long,
        global = true,
        env = "FLOTILLA_ETCD_ENDPOINT",
        default_value = "http://127.0.0.1:2379"
    )]
    endpoint: String,

    /// Key prefix the cluster state lives under.
    #[arg(
        long,
        global = true,
        env = "FLOTILLA_KEY_PREFIX",
        default_value = "/flotilla/"
    )]
    key_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Submit unit files to the cluster without loading or starting them.
    Submit(units::SubmitArgs),

    /// Start units: schedule, load and launch them.
    Start(units::UnitNamesArgs),

    /// Stop units, leaving them loaded on their machines.
    Stop(units::UnitNamesArgs),

    /// Unload units from their machines, keeping them submitted.
    Unload(units::UnitNamesArgs),

    /// Remove units from the cluster entirely.
    Destroy(units::UnitNamesArgs),

    /// Output the contents of a submitted unit.
    Cat(units::CatArgs),

    /// List units and their observed state.
    ListUnits,

    /// List machines currently present in the cluster.
    ListMachines,

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        };

        let kv = Arc::new(EtcdClient::new(&self.endpoint, Duration::from_secs(5))?);
        let ctx = CommandContext {
            registry: Registry::new(kv, &self.key_prefix),
            format,
        };

        match self.command {
            Commands::Submit(args) => units::submit(ctx, args).await,
            Commands::Start(args) => units::start(ctx, args).await,
            Commands::Stop(args) => units::stop(ctx, args).await,
            Commands::Unload(args) => units::unload(ctx, args).await,
            Commands::Destroy(args) => units::destroy(ctx, args).await,
            Commands::Cat(args) => units::cat(ctx, args).await,
            Commands::ListUnits => units::list_units(ctx).await,
            Commands::ListMachines => machines::list_machines(ctx).await,
            Commands::Version => {
                println!("flotillactl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub registry: Registry,
    pub format: OutputFormat,
}
