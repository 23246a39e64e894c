//! Machine listing.

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::error::CliError;
use crate::output::print_output;

use super::CommandContext;

/// One row of `list-machines`.
#[derive(Debug, Serialize, Tabled)]
struct MachineRow {
    #[tabled(rename = "MACHINE")]
    id: String,

    #[tabled(rename = "IP")]
    ip: String,

    #[tabled(rename = "METADATA")]
    metadata: String,

    #[tabled(rename = "VERSION")]
    version: String,

    #[tabled(rename = "FREE MEM (MB)")]
    free_memory: i64,
}

pub async fn list_machines(ctx: CommandContext) -> Result<()> {
    let machines = ctx.registry.machines().await.map_err(CliError::from)?;

    let rows: Vec<MachineRow> = machines
        .into_iter()
        .map(|m| {
            let metadata = m
                .metadata
                .as_ref()
                .filter(|meta| !meta.is_empty())
                .map(|meta| {
                    meta.iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_else(|| "-".to_string());
            MachineRow {
                id: m.id,
                ip: if m.public_ip.is_empty() {
                    "-".to_string()
                } else {
                    m.public_ip
                },
                metadata,
                version: if m.version.is_empty() {
                    "-".to_string()
                } else {
                    m.version
                },
                free_memory: m.free_resources.memory,
            }
        })
        .collect();

    print_output(&rows, ctx.format);
    Ok(())
}
