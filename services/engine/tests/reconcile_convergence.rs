//! End-to-end reconcile passes against an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use flotilla_engine::engine::{Engine, Reconciler};
use flotilla_engine::kv::{KvClient, MemKv, SetOptions};
use flotilla_engine::registry::Registry;
use flotilla_types::{Job, MachineState, Resources, TargetState, UnitFile, UnitHash, UnitState};

struct Cluster {
    kv: Arc<MemKv>,
    registry: Arc<Registry>,
    engine: Engine,
}

impl Cluster {
    fn new() -> Self {
        let kv = Arc::new(MemKv::new());
        let registry = Arc::new(Registry::new(kv.clone(), "/flotilla/"));
        let engine = Engine::new(registry.clone());
        Self {
            kv,
            registry,
            engine,
        }
    }

    async fn publish_machine(&self, id: &str) {
        let mut machine = MachineState::new(id);
        machine.total_resources = Resources::new(8, 16384, 102400);
        machine.free_resources = machine.total_resources;
        self.kv
            .set(
                &format!("/flotilla/machines/{id}/object"),
                &serde_json::to_string(&machine).unwrap(),
                SetOptions::default(),
            )
            .await
            .unwrap();
    }

    async fn declare(&self, name: &str, section_body: &str, target: TargetState) {
        let contents = format!(
            "[Service]\nExecStart=/bin/true\n\n[X-Flotilla]\n{section_body}"
        );
        let mut job = Job::new(name, UnitFile::parse(&contents));
        job.target_state = target;
        self.registry.create_unit(&job.unit).await.unwrap();
        self.registry.create_job(&job).await.unwrap();
    }

    async fn place(&self, name: &str, machine_id: &str) {
        self.registry.schedule_unit(name, machine_id).await.unwrap();
    }

    async fn run_pass(&self) {
        let (_stop_tx, stop) = watch::channel(false);
        Reconciler::new().reconcile(&self.engine, &stop).await;
    }

    async fn job(&self, name: &str) -> Job {
        self.registry.job(name).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_target_inactive_is_unscheduled() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.declare("j.service", "", TargetState::Inactive).await;
    cluster.place("j.service", "a").await;

    cluster.run_pass().await;

    let job = cluster.job("j.service").await;
    assert!(!job.scheduled());
    assert_eq!(job.target_state, TargetState::Inactive);
}

#[tokio::test]
async fn test_job_follows_a_departed_machine() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.declare("j.service", "", TargetState::Launched).await;
    // Scheduled to a machine that never published presence.
    cluster.place("j.service", "b").await;

    cluster.run_pass().await;

    let job = cluster.job("j.service").await;
    // Rescued onto the surviving machine within the same pass; the bounce
    // demoted the unit to loaded.
    assert_eq!(job.target_machine_id.as_deref(), Some("a"));
    assert_eq!(job.target_state, TargetState::Loaded);
}

#[tokio::test]
async fn test_placement_prefers_least_loaded_machine() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.publish_machine("b").await;
    cluster.declare("one.service", "", TargetState::Launched).await;
    cluster.declare("two.service", "", TargetState::Launched).await;
    cluster.place("one.service", "a").await;
    cluster.place("two.service", "a").await;
    cluster.declare("j.service", "", TargetState::Launched).await;

    cluster.run_pass().await;

    assert_eq!(
        cluster.job("j.service").await.target_machine_id.as_deref(),
        Some("b")
    );
    // Existing placements were eligible and left alone.
    assert_eq!(
        cluster.job("one.service").await.target_machine_id.as_deref(),
        Some("a")
    );
    assert_eq!(cluster.job("one.service").await.target_state, TargetState::Launched);
}

#[tokio::test]
async fn test_peer_requirement_moves_job_within_one_pass() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.publish_machine("b").await;
    cluster.declare("k.service", "", TargetState::Launched).await;
    cluster.place("k.service", "a").await;
    cluster
        .declare("j.service", "MachineOf=k.service\n", TargetState::Launched)
        .await;
    cluster.place("j.service", "b").await;

    cluster.run_pass().await;

    assert_eq!(
        cluster.job("j.service").await.target_machine_id.as_deref(),
        Some("a")
    );
    assert_eq!(
        cluster.job("k.service").await.target_machine_id.as_deref(),
        Some("a")
    );
}

#[tokio::test]
async fn test_conflict_leaves_job_unscheduled() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.declare("k.service", "", TargetState::Launched).await;
    cluster.place("k.service", "a").await;
    cluster
        .declare("j.service", "Conflicts=k.service\n", TargetState::Launched)
        .await;

    cluster.run_pass().await;

    assert!(!cluster.job("j.service").await.scheduled());
    assert_eq!(
        cluster.job("k.service").await.target_machine_id.as_deref(),
        Some("a")
    );
}

#[tokio::test]
async fn test_passes_are_idempotent() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.publish_machine("b").await;
    cluster.declare("j.service", "", TargetState::Launched).await;

    cluster.run_pass().await;
    let first = cluster.job("j.service").await;
    cluster.run_pass().await;
    let second = cluster.job("j.service").await;

    assert!(first.scheduled());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unit_states_of_destroyed_jobs_are_collected() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.declare("kept.service", "", TargetState::Launched).await;

    // An agent reported state for a job that no longer exists.
    let orphan = UnitState::new(
        "gone.service",
        "loaded",
        "active",
        "running",
        "a",
        UnitHash::of("old unit"),
    );
    cluster
        .registry
        .save_unit_state("gone.service", Some(&orphan), Duration::from_secs(60))
        .await
        .unwrap();
    let kept = UnitState::new(
        "kept.service",
        "loaded",
        "active",
        "running",
        "a",
        UnitHash::of("kept unit"),
    );
    cluster
        .registry
        .save_unit_state("kept.service", Some(&kept), Duration::from_secs(60))
        .await
        .unwrap();

    cluster.run_pass().await;

    let states = cluster.registry.unit_states().await.unwrap();
    let names: Vec<&str> = states.iter().map(|s| s.unit_name.as_str()).collect();
    assert_eq!(names, vec!["kept.service"]);
    assert!(cluster
        .registry
        .unit_state("gone.service", "a")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unit_state_round_trip_through_store() {
    let cluster = Cluster::new();
    let state = UnitState::new(
        "foo.service",
        "loaded",
        "active",
        "running",
        "mach1",
        UnitHash::of("some unit"),
    );

    cluster
        .registry
        .save_unit_state("foo.service", Some(&state), Duration::from_secs(60))
        .await
        .unwrap();

    // Readable through both the point lookup and the listing.
    let fetched = cluster
        .registry
        .unit_state("foo.service", "mach1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched, state);

    let listed = cluster.registry.unit_states().await.unwrap();
    assert_eq!(listed, vec![state]);

    cluster
        .registry
        .remove_unit_state("foo.service")
        .await
        .unwrap();
    assert!(cluster.registry.unit_states().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stopped_pass_writes_nothing() {
    let cluster = Cluster::new();
    cluster.publish_machine("a").await;
    cluster.declare("j.service", "", TargetState::Launched).await;

    let (stop_tx, stop) = watch::channel(false);
    stop_tx.send(true).unwrap();
    Reconciler::new().reconcile(&cluster.engine, &stop).await;

    assert!(!cluster.job("j.service").await.scheduled());
}
