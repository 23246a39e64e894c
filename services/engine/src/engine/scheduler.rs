//! Placement policy.

use std::cmp::Reverse;

use thiserror::Error;

use flotilla_types::Job;

use super::snapshot::ClusterSnapshot;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No present machine can take the job right now.
    #[error("no machine able to run unit {0}")]
    Unschedulable(String),
}

/// A placement decision: a pure function of the snapshot and the job.
pub trait Scheduler: Send + Sync {
    fn decide(&self, cluster: &ClusterSnapshot, job: &Job) -> Result<String, SchedulerError>;
}

/// Reference policy: pick the eligible agent with the fewest scheduled
/// units, preferring more free memory, then the lexicographically smallest
/// machine id. Never depends on store iteration order.
#[derive(Debug, Default)]
pub struct LeastLoadedScheduler;

impl Scheduler for LeastLoadedScheduler {
    fn decide(&self, cluster: &ClusterSnapshot, job: &Job) -> Result<String, SchedulerError> {
        cluster
            .agents()
            .values()
            .filter(|agent| agent.able_to_run(job).is_ok())
            .min_by_key(|agent| {
                (
                    agent.unit_count(),
                    Reverse(agent.free_resources().memory),
                    agent.id().to_string(),
                )
            })
            .map(|agent| agent.id().to_string())
            .ok_or_else(|| SchedulerError::Unschedulable(job.name.clone()))
    }
}
