//! Prometheus metrics for the engine.
//!
//! Collectors register against the default registry and are exported in
//! text exposition format by the status API.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

lazy_static! {
    /// Completed reconcile passes.
    pub static ref ENGINE_RECONCILE_SUCCESS: IntCounter = register_int_counter!(
        "engine_reconcile_success_total",
        "Total number of completed reconcile passes"
    )
    .unwrap();

    /// Wall time of a reconcile pass.
    pub static ref ENGINE_RECONCILE_DURATION: Histogram = register_histogram!(
        "engine_reconcile_duration_seconds",
        "Histogram of reconcile pass duration in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .unwrap();

    /// Decisions the reconciler could not carry through, by reason.
    pub static ref ENGINE_RECONCILE_FAILURE: IntCounterVec = register_int_counter_vec!(
        "engine_reconcile_failure_total",
        "Total number of reconcile failures by reason",
        &["reason"]
    )
    .unwrap();

    /// Tasks executed, by type.
    pub static ref ENGINE_TASK: IntCounterVec = register_int_counter_vec!(
        "engine_task_total",
        "Total number of reconciler tasks executed by type",
        &["type"]
    )
    .unwrap();

    /// Task executions that failed, by type.
    pub static ref ENGINE_TASK_FAILURE: IntCounterVec = register_int_counter_vec!(
        "engine_task_failure_total",
        "Total number of failed reconciler tasks by type",
        &["type"]
    )
    .unwrap();
}

/// Why a reconcile decision failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileFailure {
    /// A job's target machine left the cluster.
    MachineAway,
    /// A machine can no longer run a unit scheduled to it.
    RunFailure,
    /// No machine could be found for an unscheduled unit.
    ScheduleFailure,
}

impl ReconcileFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MachineAway => "machine_away",
            Self::RunFailure => "run_failure",
            Self::ScheduleFailure => "schedule_failure",
        }
    }
}

pub fn report_reconcile_success(elapsed: Duration) {
    ENGINE_RECONCILE_SUCCESS.inc();
    ENGINE_RECONCILE_DURATION.observe(elapsed.as_secs_f64());
}

pub fn report_reconcile_failure(reason: ReconcileFailure) {
    ENGINE_RECONCILE_FAILURE
        .with_label_values(&[reason.as_str()])
        .inc();
}

pub fn report_engine_task(kind: &str) {
    ENGINE_TASK.with_label_values(&[kind]).inc();
}

pub fn report_engine_task_failure(kind: &str) {
    ENGINE_TASK_FAILURE.with_label_values(&[kind]).inc();
}

/// Current failure count for a reason. Intended for tests, which assert
/// deltas because collectors are process-global.
pub fn reconcile_failure_count(reason: ReconcileFailure) -> u64 {
    ENGINE_RECONCILE_FAILURE
        .with_label_values(&[reason.as_str()])
        .get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter_increments() {
        let before = reconcile_failure_count(ReconcileFailure::MachineAway);
        report_reconcile_failure(ReconcileFailure::MachineAway);
        assert_eq!(
            reconcile_failure_count(ReconcileFailure::MachineAway),
            before + 1
        );
    }

    #[test]
    fn test_task_counters() {
        report_engine_task("UnscheduleUnit");
        report_engine_task_failure("AttemptScheduleUnit");
        assert!(ENGINE_TASK.with_label_values(&["UnscheduleUnit"]).get() >= 1);
    }
}
