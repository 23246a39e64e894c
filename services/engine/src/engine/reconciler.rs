//! The reconcile pass: compare declared jobs against observed cluster
//! state and emit scheduling tasks.
//!
//! Each pass runs in two phases over a single snapshot. The unschedule
//! phase clears placements that can no longer stand; the schedule phase
//! places whatever is free afterwards. That order lets a slot freed early
//! in a pass be reclaimed later in the same pass.
//!
//! Tasks flow through a bounded hand-off channel of capacity one: the
//! producer checks the stop signal before every emission, the consumer
//! before every store write. Snapshot mutations are pass-local, so an
//! aborted pass leaves nothing half-applied beyond writes that already
//! committed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use flotilla_types::TargetState;

use super::scheduler::{LeastLoadedScheduler, Scheduler};
use super::snapshot::{ClusterSnapshot, Ineligibility};
use super::Engine;
use crate::metrics::{self, ReconcileFailure};

/// Reason marker for placements undone because a peer is elsewhere;
/// surfaced verbatim so operators can tell recoverable unscheduling apart
/// from hard failures.
pub const JOB_RESCHEDULE: &str = "JobReschedule";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    UnscheduleUnit,
    AttemptScheduleUnit,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnscheduleUnit => "UnscheduleUnit",
            Self::AttemptScheduleUnit => "AttemptScheduleUnit",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One scheduling decision, consumed within the pass that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_type: TaskType,
    pub job_name: String,
    pub machine_id: String,
    pub reason: String,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}, {}): {}",
            self.task_type, self.job_name, self.machine_id, self.reason
        )
    }
}

pub struct Reconciler {
    scheduler: Arc<dyn Scheduler>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            scheduler: Arc::new(LeastLoadedScheduler),
        }
    }

    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Run one reconcile pass against the engine.
    pub async fn reconcile(&self, engine: &Engine, stop: &watch::Receiver<bool>) {
        debug!("polling registry for actionable work");
        let start = Instant::now();

        let clust = match engine.cluster_state().await {
            Ok(clust) => clust,
            Err(error) => {
                error!(%error, "failed getting current cluster state");
                return;
            }
        };
        let declared: BTreeSet<String> = clust.jobs().keys().cloned().collect();

        let mut tasks = self.calculate_cluster_tasks(clust, stop.clone());
        while let Some(task) = tasks.recv().await {
            if *stop.borrow() {
                return;
            }
            engine.resolve_task(&task).await;
        }

        if !*stop.borrow() {
            engine.gc_unit_states(&declared).await;
        }

        metrics::report_reconcile_success(start.elapsed());
    }

    /// Produce the pass's tasks over a capacity-one channel.
    ///
    /// The producer owns the snapshot and applies each decision to it
    /// before moving on, so decisions later in the pass observe earlier
    /// ones. On stop it ceases producing and closes its end; the snapshot
    /// and its in-memory mutations are simply dropped.
    pub(crate) fn calculate_cluster_tasks(
        &self,
        mut clust: ClusterSnapshot,
        stop: watch::Receiver<bool>,
    ) -> mpsc::Receiver<Task> {
        let (tx, rx) = mpsc::channel(1);
        let scheduler = Arc::clone(&self.scheduler);

        tokio::spawn(async move {
            // Unschedule phase.
            let scheduled: Vec<String> = clust
                .jobs()
                .values()
                .filter(|j| j.scheduled())
                .map(|j| j.name.clone())
                .collect();

            for name in scheduled {
                let decision = {
                    let job = &clust.jobs()[&name];
                    let Some(machine_id) = job.target_machine_id.clone() else {
                        continue;
                    };

                    if job.target_state == TargetState::Inactive {
                        Some((machine_id, "target state inactive".to_string()))
                    } else {
                        match clust.agent(&machine_id) {
                            None => {
                                metrics::report_reconcile_failure(ReconcileFailure::MachineAway);
                                let reason = format!("target machine {machine_id} went away");
                                Some((machine_id, reason))
                            }
                            Some(agent) => match agent.able_to_run(job) {
                                Ok(()) => None,
                                Err(Ineligibility::Reschedule) => {
                                    Some((machine_id, JOB_RESCHEDULE.to_string()))
                                }
                                Err(Ineligibility::Unable(_)) => {
                                    metrics::report_reconcile_failure(ReconcileFailure::RunFailure);
                                    let reason =
                                        format!("target machine {machine_id} unable to run unit");
                                    Some((machine_id, reason))
                                }
                            },
                        }
                    }
                };

                let Some((machine_id, reason)) = decision else {
                    continue;
                };
                let task = Task {
                    task_type: TaskType::UnscheduleUnit,
                    job_name: name.clone(),
                    machine_id,
                    reason,
                };
                if !send_task(&tx, &stop, task).await {
                    return;
                }
                clust.unschedule(&name);
            }

            // Schedule phase. Re-check placement per job: unschedules above
            // are already folded into the snapshot.
            let names: Vec<String> = clust.jobs().keys().cloned().collect();
            for name in names {
                let (machine_id, reason) = {
                    let job = &clust.jobs()[&name];
                    if job.scheduled() || job.target_state == TargetState::Inactive {
                        continue;
                    }
                    match scheduler.decide(&clust, job) {
                        Ok(machine_id) => {
                            let reason = format!(
                                "target state {} and unit not scheduled",
                                job.target_state
                            );
                            (machine_id, reason)
                        }
                        Err(error) => {
                            debug!(job = %name, %error, "unable to schedule unit");
                            metrics::report_reconcile_failure(ReconcileFailure::ScheduleFailure);
                            continue;
                        }
                    }
                };

                let task = Task {
                    task_type: TaskType::AttemptScheduleUnit,
                    job_name: name.clone(),
                    machine_id: machine_id.clone(),
                    reason,
                };
                if !send_task(&tx, &stop, task).await {
                    metrics::report_reconcile_failure(ReconcileFailure::ScheduleFailure);
                    return;
                }
                clust.schedule(&name, &machine_id);
            }
        });

        rx
    }
}

/// Hand a task to the consumer, observing the stop signal first.
async fn send_task(tx: &mpsc::Sender<Task>, stop: &watch::Receiver<bool>, task: Task) -> bool {
    if *stop.borrow() {
        return false;
    }
    tx.send(task).await.is_ok()
}
