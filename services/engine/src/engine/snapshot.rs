//! Pass-local view of the cluster.
//!
//! Built once per reconcile pass from the registry, then mutated only in
//! memory: scheduling decisions made earlier in a pass must be visible to
//! every later decision in the same pass, without touching the store.

use std::collections::BTreeMap;

use flotilla_types::{version_at_least, Job, MachineState, Resources};

/// Why an agent cannot take a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    /// A peer is not here yet; placement may succeed on a later pass once
    /// the peer lands.
    Reschedule,
    /// A hard mismatch between the job's requirements and this machine.
    Unable(String),
}

/// One machine plus the scheduling bookkeeping folded onto it.
#[derive(Debug, Clone)]
pub struct AgentState {
    machine: MachineState,
    units: BTreeMap<String, Job>,
    free: Resources,
}

impl AgentState {
    fn new(machine: MachineState) -> Self {
        let free = machine.free_resources;
        Self {
            machine,
            units: BTreeMap::new(),
            free,
        }
    }

    pub fn machine(&self) -> &MachineState {
        &self.machine
    }

    pub fn id(&self) -> &str {
        &self.machine.id
    }

    /// Units currently assigned to this machine within the snapshot.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Free resources after pass-local reservations.
    pub fn free_resources(&self) -> Resources {
        self.free
    }

    fn assign(&mut self, job: Job) {
        self.free = self.free.saturating_sub(&job.required_resources());
        self.units.insert(job.name.clone(), job);
    }

    fn withdraw(&mut self, name: &str) {
        if let Some(job) = self.units.remove(name) {
            self.free = self.free.saturating_add(&job.required_resources());
        }
    }

    /// Ordered eligibility check; the first failing predicate wins.
    ///
    /// Order: metadata, peers, conflicts, resources, version. Peer
    /// failures are recoverable (`Reschedule`): the peer may be placed
    /// here later in this pass or a following one.
    pub fn able_to_run(&self, job: &Job) -> Result<(), Ineligibility> {
        let required = job.required_machine_metadata();
        if !self.machine.has_metadata(&required) {
            return Err(Ineligibility::Unable(
                "machine metadata check failed".to_string(),
            ));
        }

        for peer in job.peers() {
            if !self.units.contains_key(&peer) {
                return Err(Ineligibility::Reschedule);
            }
        }

        for conflict in job.conflicts() {
            if self.units.contains_key(&conflict) {
                return Err(Ineligibility::Unable(format!(
                    "conflict with scheduled unit {conflict}"
                )));
            }
        }
        for unit in self.units.values() {
            if unit.conflicts().iter().any(|c| *c == job.name) {
                return Err(Ineligibility::Unable(format!(
                    "scheduled unit {} conflicts with this unit",
                    unit.name
                )));
            }
        }

        if !self.free.covers(&job.required_resources()) {
            return Err(Ineligibility::Unable(
                "insufficient free resources".to_string(),
            ));
        }

        if let Some(min) = job.min_version() {
            if !version_at_least(&self.machine.version, &min) {
                return Err(Ineligibility::Unable(format!(
                    "machine version below required {min}"
                )));
            }
        }

        Ok(())
    }
}

/// The cluster as one reconcile pass sees it.
pub struct ClusterSnapshot {
    jobs: BTreeMap<String, Job>,
    agents: BTreeMap<String, AgentState>,
}

impl ClusterSnapshot {
    /// Fold declared jobs onto present machines. Jobs targeting a machine
    /// that is not in `machines` keep their placement here; the reconciler
    /// notices the missing agent and unschedules them.
    pub fn new(jobs: Vec<Job>, machines: Vec<MachineState>) -> Self {
        let mut agents: BTreeMap<String, AgentState> = machines
            .into_iter()
            .map(|m| (m.id.clone(), AgentState::new(m)))
            .collect();

        let jobs: BTreeMap<String, Job> =
            jobs.into_iter().map(|j| (j.name.clone(), j)).collect();
        for job in jobs.values() {
            if let Some(machine_id) = &job.target_machine_id {
                if let Some(agent) = agents.get_mut(machine_id) {
                    agent.assign(job.clone());
                }
            }
        }

        Self { jobs, agents }
    }

    pub fn jobs(&self) -> &BTreeMap<String, Job> {
        &self.jobs
    }

    pub fn agents(&self) -> &BTreeMap<String, AgentState> {
        &self.agents
    }

    pub fn agent(&self, machine_id: &str) -> Option<&AgentState> {
        self.agents.get(machine_id)
    }

    /// Clear a job's placement in this snapshot only.
    pub fn unschedule(&mut self, name: &str) {
        let Some(job) = self.jobs.get_mut(name) else {
            return;
        };
        if let Some(machine_id) = job.target_machine_id.take() {
            if let Some(agent) = self.agents.get_mut(&machine_id) {
                agent.withdraw(name);
            }
        }
    }

    /// Record a placement in this snapshot only.
    pub fn schedule(&mut self, name: &str, machine_id: &str) {
        let Some(job) = self.jobs.get_mut(name) else {
            return;
        };
        job.target_machine_id = Some(machine_id.to_string());
        let job = job.clone();
        if let Some(agent) = self.agents.get_mut(machine_id) {
            agent.assign(job);
        }
    }
}
