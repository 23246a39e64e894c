//! Job storage: declared state, target state and placement.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use flotilla_types::{Job, TargetState, UnitHash};

use super::{Registry, RegistryError};
use crate::kv::{DeleteOptions, KvError, SetOptions};

/// Wire form of `job/<name>/object`, written once at creation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobModel {
    name: String,
    unit_hash: UnitHash,
    target_state: TargetState,
}

/// Raw key contents for one job, collected from a recursive listing.
#[derive(Default)]
struct JobEntry {
    object: Option<String>,
    target_state: Option<String>,
    target_machine: Option<String>,
}

impl Registry {
    /// All declared jobs, sorted by name.
    ///
    /// Entries that fail to decode or reference a missing unit file are
    /// skipped with a warning; a store failure fails the whole read.
    pub async fn jobs(&self) -> Result<Vec<Job>, RegistryError> {
        let prefix = self.job_prefix();
        let pairs = Self::absent_as_empty(self.kv().list(&prefix).await)?;

        let mut entries: BTreeMap<String, JobEntry> = BTreeMap::new();
        for pair in pairs {
            let rel = pair
                .key
                .strip_prefix(&prefix)
                .unwrap_or(&pair.key)
                .trim_start_matches('/');
            let Some((name, leaf)) = rel.split_once('/') else {
                continue;
            };
            let entry = entries.entry(name.to_string()).or_default();
            match leaf {
                "object" => entry.object = Some(pair.value),
                "target-state" => entry.target_state = Some(pair.value),
                "target-machine" => entry.target_machine = Some(pair.value),
                _ => {}
            }
        }

        let mut jobs = Vec::new();
        for (name, entry) in entries {
            if let Some(job) = self.assemble_job(&name, entry).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Fetch a single job by unit name.
    pub async fn job(&self, name: &str) -> Result<Option<Job>, RegistryError> {
        let pairs = match self.kv().list(&self.job_path(name)).await {
            Ok(pairs) => pairs,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut entry = JobEntry::default();
        for pair in pairs {
            if pair.key.ends_with("/object") {
                entry.object = Some(pair.value);
            } else if pair.key.ends_with("/target-state") {
                entry.target_state = Some(pair.value);
            } else if pair.key.ends_with("/target-machine") {
                entry.target_machine = Some(pair.value);
            }
        }
        self.assemble_job(name, entry).await
    }

    async fn assemble_job(
        &self,
        name: &str,
        entry: JobEntry,
    ) -> Result<Option<Job>, RegistryError> {
        let Some(object) = entry.object else {
            return Ok(None);
        };
        let model: JobModel = match serde_json::from_str(&object) {
            Ok(model) => model,
            Err(error) => {
                warn!(job = %name, %error, "undecodable job object");
                return Ok(None);
            }
        };

        let Some(unit) = self.unit(&model.unit_hash).await? else {
            warn!(job = %name, unit_hash = %model.unit_hash, "job references missing unit file");
            return Ok(None);
        };

        // The mutable target-state key is authoritative; the object value
        // covers jobs created before their first state change.
        let target_state = entry
            .target_state
            .as_deref()
            .and_then(|s| TargetState::from_str(s).ok())
            .unwrap_or(model.target_state);

        Ok(Some(Job {
            name: name.to_string(),
            unit,
            target_state,
            target_machine_id: entry.target_machine.filter(|m| !m.is_empty()),
        }))
    }

    /// Declare a new job. The referenced unit file must already be stored.
    pub async fn create_job(&self, job: &Job) -> Result<(), RegistryError> {
        let key = self.job_object_path(&job.name);
        let model = JobModel {
            name: job.name.clone(),
            unit_hash: job.unit.hash(),
            target_state: job.target_state,
        };
        let value = serde_json::to_string(&model).map_err(|source| RegistryError::Codec {
            key: key.clone(),
            source,
        })?;

        match self.kv().set(&key, &value, SetOptions::create_only()).await {
            Ok(()) => {}
            Err(KvError::AlreadyExists(_)) => {
                return Err(RegistryError::JobExists(job.name.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        self.set_target_state(&job.name, job.target_state).await
    }

    /// Remove a job and its declared state. Observed unit states are
    /// garbage-collected by the reconciler.
    pub async fn destroy_job(&self, name: &str) -> Result<(), RegistryError> {
        match self
            .kv()
            .delete(
                &self.job_path(name),
                DeleteOptions {
                    recursive: true,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a job's desired runtime state. Operator-owned.
    pub async fn set_target_state(
        &self,
        name: &str,
        state: TargetState,
    ) -> Result<(), RegistryError> {
        self.kv()
            .set(
                &self.job_target_state_path(name),
                state.as_str(),
                SetOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Record a placement decision: create-only write of the target machine.
    pub async fn schedule_unit(&self, name: &str, machine_id: &str) -> Result<(), RegistryError> {
        self.kv()
            .set(
                &self.job_target_machine_path(name),
                machine_id,
                SetOptions::create_only(),
            )
            .await?;
        Ok(())
    }

    /// Clear a placement, guarded on the machine it was bound to.
    /// A missing key means the job is already unscheduled.
    pub async fn unschedule_unit(&self, name: &str, machine_id: &str) -> Result<(), RegistryError> {
        match self
            .kv()
            .delete(
                &self.job_target_machine_path(name),
                DeleteOptions {
                    prev_value: Some(machine_id.to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
