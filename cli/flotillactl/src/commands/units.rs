//! Unit lifecycle commands.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use flotilla_types::{Job, TargetState, UnitFile};

use crate::error::CliError;
use crate::output::{print_output, print_success};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Unit files to submit.
    #[arg(required = true)]
    files: Vec<String>,
}

#[derive(Debug, Args)]
pub struct UnitNamesArgs {
    /// Unit names. A missing `.service` suffix is added.
    #[arg(required = true)]
    units: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CatArgs {
    /// Unit name.
    unit: String,
}

/// Append `.service` when the name carries no unit suffix, so
/// `flotillactl start foo` and `foo.service` mean the same unit.
fn unit_name_mangle(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    if base.contains('.') {
        base.to_string()
    } else {
        format!("{base}.service")
    }
}

/// Submit unit files: store the content-addressed unit and declare an
/// inactive job for each.
pub async fn submit(ctx: CommandContext, args: SubmitArgs) -> Result<()> {
    for file in &args.files {
        let contents = std::fs::read_to_string(file)
            .map_err(|e| CliError::InvalidInput(format!("cannot read {file}: {e}")))?;
        let name = unit_name_mangle(file);

        let job = Job::new(name.clone(), UnitFile::parse(&contents));
        ctx.registry.create_unit(&job.unit).await.map_err(CliError::from)?;
        ctx.registry.create_job(&job).await.map_err(CliError::from)?;
        print_success(&format!("Submitted {name}"));
    }
    Ok(())
}

pub async fn start(ctx: CommandContext, args: UnitNamesArgs) -> Result<()> {
    set_target_state(ctx, args, TargetState::Launched).await
}

pub async fn stop(ctx: CommandContext, args: UnitNamesArgs) -> Result<()> {
    set_target_state(ctx, args, TargetState::Loaded).await
}

pub async fn unload(ctx: CommandContext, args: UnitNamesArgs) -> Result<()> {
    set_target_state(ctx, args, TargetState::Inactive).await
}

async fn set_target_state(
    ctx: CommandContext,
    args: UnitNamesArgs,
    state: TargetState,
) -> Result<()> {
    for unit in &args.units {
        let name = unit_name_mangle(unit);
        if ctx.registry.job(&name).await.map_err(CliError::from)?.is_none() {
            return Err(CliError::NotFound(name).into());
        }
        ctx.registry
            .set_target_state(&name, state)
            .await
            .map_err(CliError::from)?;
        print_success(&format!("Set target state of {name} to {state}"));
    }
    Ok(())
}

pub async fn destroy(ctx: CommandContext, args: UnitNamesArgs) -> Result<()> {
    for unit in &args.units {
        let name = unit_name_mangle(unit);
        if ctx.registry.job(&name).await.map_err(CliError::from)?.is_none() {
            return Err(CliError::NotFound(name).into());
        }
        ctx.registry.destroy_job(&name).await.map_err(CliError::from)?;
        print_success(&format!("Destroyed {name}"));
    }
    Ok(())
}

/// Print the stored unit file exactly as submitted.
pub async fn cat(ctx: CommandContext, args: CatArgs) -> Result<()> {
    let name = unit_name_mangle(&args.unit);
    let job = ctx
        .registry
        .job(&name)
        .await
        .map_err(CliError::from)?
        .ok_or(CliError::NotFound(name))?;

    // The contents must not be modified, so no trailing newline is added.
    print!("{}", job.unit.raw());
    Ok(())
}

/// One row of `list-units`.
#[derive(Debug, Serialize, Tabled)]
struct UnitRow {
    #[tabled(rename = "UNIT")]
    unit: String,

    #[tabled(rename = "HASH")]
    hash: String,

    #[tabled(rename = "DSTATE")]
    desired_state: String,

    #[tabled(rename = "STATE")]
    state: String,

    #[tabled(rename = "MACHINE")]
    machine: String,
}

/// List every declared job joined with the state its machine reports.
pub async fn list_units(ctx: CommandContext) -> Result<()> {
    let jobs = ctx.registry.jobs().await.map_err(CliError::from)?;
    let states = ctx.registry.unit_states().await.map_err(CliError::from)?;

    let observed: BTreeMap<(String, String), String> = states
        .into_iter()
        .map(|s| {
            (
                (s.unit_name.clone(), s.machine_id.clone()),
                s.active_state,
            )
        })
        .collect();

    let rows: Vec<UnitRow> = jobs
        .into_iter()
        .map(|job| {
            let machine = job.target_machine_id.clone().unwrap_or_else(|| "-".to_string());
            let state = observed
                .get(&(job.name.clone(), machine.clone()))
                .cloned()
                .unwrap_or_else(|| "-".to_string());
            UnitRow {
                hash: job.unit.hash().short().to_string(),
                desired_state: job.target_state.to_string(),
                state,
                machine,
                unit: job.name,
            }
        })
        .collect();

    print_output(&rows, ctx.format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_name_mangle() {
        assert_eq!(unit_name_mangle("foo"), "foo.service");
        assert_eq!(unit_name_mangle("foo.service"), "foo.service");
        assert_eq!(unit_name_mangle("bar.timer"), "bar.timer");
        assert_eq!(unit_name_mangle("units/foo.service"), "foo.service");
    }
}
