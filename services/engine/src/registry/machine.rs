//! Machine presence, advertised by agents under TTL leases.

use tracing::warn;

use flotilla_types::MachineState;

use super::{Registry, RegistryError};

impl Registry {
    /// Machines currently present in the cluster, sorted by id.
    ///
    /// Presence is a TTL lease: an expired machine simply stops appearing
    /// here. Undecodable records are skipped with a warning.
    pub async fn machines(&self) -> Result<Vec<MachineState>, RegistryError> {
        let pairs = Self::absent_as_empty(self.kv().list(&self.machines_prefix()).await)?;

        let mut machines = Vec::new();
        for pair in pairs {
            if !pair.key.ends_with("/object") {
                continue;
            }
            match serde_json::from_str::<MachineState>(&pair.value) {
                Ok(machine) if !machine.id.is_empty() => machines.push(machine),
                Ok(_) => warn!(key = %pair.key, "machine record without id"),
                Err(error) => {
                    warn!(key = %pair.key, %error, "skipping undecodable machine record")
                }
            }
        }
        machines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(machines)
    }
}
