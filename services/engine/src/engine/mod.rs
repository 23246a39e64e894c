//! The engine: leadership-gated scheduling for the whole cluster.
//!
//! Only the lease holder runs the reconciler; every scheduling-side write
//! goes through the [`Engine`] facade so tests can observe side effects
//! through the registry alone.

mod leadership;
mod reconciler;
mod scheduler;
mod snapshot;
mod worker;

pub use leadership::LeaseKeeper;
pub use reconciler::{Reconciler, Task, TaskType, JOB_RESCHEDULE};
pub use scheduler::{LeastLoadedScheduler, Scheduler, SchedulerError};
pub use snapshot::{AgentState, ClusterSnapshot, Ineligibility};
pub use worker::EngineWorker;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use flotilla_types::TargetState;

use crate::metrics;
use crate::registry::{Registry, RegistryError};

/// Command surface the reconciler drives.
pub struct Engine {
    registry: Arc<Registry>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Build the pass snapshot. Jobs and machines are fetched
    /// concurrently; either failure fails the pass.
    pub async fn cluster_state(&self) -> Result<ClusterSnapshot, RegistryError> {
        let (jobs, machines) =
            tokio::try_join!(self.registry.jobs(), self.registry.machines())?;
        Ok(ClusterSnapshot::new(jobs, machines))
    }

    /// Clear a job's placement. A non-global job left with target state
    /// `launched` is demoted to `loaded`: a bounced unit must not launch
    /// on a machine the operator never saw it land on.
    async fn unschedule_unit(&self, name: &str, machine_id: &str) -> Result<(), RegistryError> {
        self.registry.unschedule_unit(name, machine_id).await?;

        if let Some(job) = self.registry.job(name).await? {
            if !job.is_global() && job.target_state == TargetState::Launched {
                self.registry
                    .set_target_state(name, TargetState::Loaded)
                    .await?;
            }
        }
        Ok(())
    }

    /// Record a placement. Writes only the target machine; target state
    /// stays operator-owned.
    async fn attempt_schedule_unit(&self, name: &str, machine_id: &str) -> Result<(), RegistryError> {
        self.registry.schedule_unit(name, machine_id).await
    }

    /// Execute one task. Failures are logged and counted; the pass
    /// carries on and the next pass reconsiders.
    pub(crate) async fn resolve_task(&self, task: &Task) {
        let result = match task.task_type {
            TaskType::UnscheduleUnit => {
                self.unschedule_unit(&task.job_name, &task.machine_id).await
            }
            TaskType::AttemptScheduleUnit => {
                self.attempt_schedule_unit(&task.job_name, &task.machine_id)
                    .await
            }
        };
        metrics::report_engine_task(task.task_type.as_str());

        match result {
            Ok(()) => info!(task = %task, "completed task"),
            Err(error) => {
                error!(task = %task, %error, "failed resolving task");
                metrics::report_engine_task_failure(task.task_type.as_str());
            }
        }
    }

    /// Drop observed unit states whose job no longer exists.
    pub(crate) async fn gc_unit_states(&self, declared: &BTreeSet<String>) {
        let states = match self.registry.unit_states().await {
            Ok(states) => states,
            Err(error) => {
                warn!(%error, "failed listing unit states for garbage collection");
                return;
            }
        };

        let orphaned: BTreeSet<&str> = states
            .iter()
            .map(|s| s.unit_name.as_str())
            .filter(|name| !declared.contains(*name))
            .collect();

        for name in orphaned {
            match self.registry.remove_unit_state(name).await {
                Ok(()) => info!(unit = %name, "removed unit state for destroyed job"),
                Err(error) => warn!(unit = %name, %error, "failed removing stale unit state"),
            }
        }
    }
}
