//! Resource counters for machines and unit reservations.

use serde::{Deserialize, Serialize};

/// Countable resources on a machine: CPU cores, memory and disk in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(rename = "Cores", default)]
    pub cores: i32,

    #[serde(rename = "Memory", default)]
    pub memory: i64,

    #[serde(rename = "Disk", default)]
    pub disk: i64,
}

impl Resources {
    pub fn new(cores: i32, memory: i64, disk: i64) -> Self {
        Self {
            cores,
            memory,
            disk,
        }
    }

    /// True when every counter covers the corresponding counter of `other`.
    pub fn covers(&self, other: &Resources) -> bool {
        self.cores >= other.cores && self.memory >= other.memory && self.disk >= other.disk
    }

    /// Subtract `other`, clamping each counter at zero.
    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            cores: self.cores.saturating_sub(other.cores).max(0),
            memory: self.memory.saturating_sub(other.memory).max(0),
            disk: self.disk.saturating_sub(other.disk).max(0),
        }
    }

    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            cores: self.cores.saturating_add(other.cores),
            memory: self.memory.saturating_add(other.memory),
            disk: self.disk.saturating_add(other.disk),
        }
    }
}
