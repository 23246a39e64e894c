//! Jobs: operator-declared desired state for a unit in the cluster.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::Resources;
use crate::unit::UnitFile;

/// Desired runtime state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// Not loaded into any service manager.
    Inactive,
    /// Loaded on the target machine but not started.
    Loaded,
    /// Loaded and started.
    Launched,
}

impl TargetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Loaded => "loaded",
            Self::Launched => "launched",
        }
    }
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("invalid target state: {0}")]
pub struct TargetStateParseError(String);

impl FromStr for TargetState {
    type Err = TargetStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "loaded" => Ok(Self::Loaded),
            "launched" => Ok(Self::Launched),
            other => Err(TargetStateParseError(other.to_string())),
        }
    }
}

/// A unit declared to the cluster, with its placement requirements derived
/// from the unit file's scheduling options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Unit name, unique within the cluster.
    pub name: String,

    /// The unit file this job runs.
    pub unit: UnitFile,

    /// Desired runtime state.
    pub target_state: TargetState,

    /// Machine the engine has placed this job on; `None` means unscheduled.
    pub target_machine_id: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, unit: UnitFile) -> Self {
        Self {
            name: name.into(),
            unit,
            target_state: TargetState::Inactive,
            target_machine_id: None,
        }
    }

    pub fn scheduled(&self) -> bool {
        self.target_machine_id.is_some()
    }

    /// A global job targets every eligible machine rather than one.
    pub fn is_global(&self) -> bool {
        self.unit
            .requirements("Global")
            .last()
            .map(|v| *v == "true" || *v == "1")
            .unwrap_or(false)
    }

    /// Metadata entries a machine must carry, key → acceptable values.
    ///
    /// Each `MachineMetadata=key=value` option contributes one acceptable
    /// value; repeating a key widens its acceptable set.
    pub fn required_machine_metadata(&self) -> BTreeMap<String, Vec<String>> {
        let mut required: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for value in self.unit.requirements("MachineMetadata") {
            if let Some((key, value)) = value.split_once('=') {
                let (key, value) = (key.trim(), value.trim());
                if !key.is_empty() && !value.is_empty() {
                    required
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                }
            }
        }
        required
    }

    /// Units that must be scheduled to the same machine as this job.
    pub fn peers(&self) -> Vec<String> {
        self.unit
            .requirements("MachineOf")
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Units that must not share a machine with this job.
    pub fn conflicts(&self) -> Vec<String> {
        self.unit
            .requirements("Conflicts")
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Resources this job reserves on its machine.
    pub fn required_resources(&self) -> Resources {
        let last_int = |name: &str| -> i64 {
            self.unit
                .requirements(name)
                .last()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        Resources {
            cores: last_int("CoresReservation") as i32,
            memory: last_int("MemoryReservation"),
            disk: last_int("DiskReservation"),
        }
    }

    /// Minimum agent version this job requires, if any.
    pub fn min_version(&self) -> Option<String> {
        self.unit
            .requirements("MinVersion")
            .last()
            .map(|v| v.to_string())
    }
}
