//! Observed runtime state for a (unit, machine) pair.

use crate::unit::UnitHash;

/// What a machine's service manager reports for a unit, published by the
/// machine's agent and read back by operators.
///
/// The load/active/sub states are opaque strings from the service manager.
/// `unit_hash` names the version of the unit file actually loaded; a state
/// with an empty hash must not be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub unit_name: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub machine_id: String,
    pub unit_hash: UnitHash,
}

impl UnitState {
    pub fn new(
        unit_name: impl Into<String>,
        load_state: impl Into<String>,
        active_state: impl Into<String>,
        sub_state: impl Into<String>,
        machine_id: impl Into<String>,
        unit_hash: UnitHash,
    ) -> Self {
        Self {
            unit_name: unit_name.into(),
            load_state: load_state.into(),
            active_state: active_state.into(),
            sub_state: sub_state.into(),
            machine_id: machine_id.into(),
            unit_hash,
        }
    }
}
