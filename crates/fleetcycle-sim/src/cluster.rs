//! Simulated orchestrator cluster and capacity group.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use fleetcycle_core::*;

/// A termination issued through the capacity group API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub host_id: String,
    pub member: Option<String>,
    /// Running tasks on the member at the moment of termination.
    pub running_tasks: u32,
    pub decrement_desired: bool,
}

struct SimHost {
    lifecycle: LifecycleState,
    /// Ticks spent pending.
    age: u32,
    /// Ticks spent in service without a registered member.
    unregistered_for: u32,
    member: Option<String>,
}

struct SimMember {
    host_id: String,
    running_tasks: u32,
    draining: bool,
}

struct World {
    group_name: String,
    desired: u32,
    min_size: u32,
    max_size: u32,
    hosts: BTreeMap<String, SimHost>,
    members: BTreeMap<String, SimMember>,
    next_id: u32,
    launch_ticks: u32,
    join_ticks: u32,
    drain_per_tick: u32,
    stuck: BTreeSet<String>,
    throttle_remaining: u32,
    failures: HashMap<&'static str, ApiErrorKind>,
    suspended: BTreeSet<String>,
    ticks: u32,
    mutations: u32,
    in_service_history: Vec<u32>,
    terminations: Vec<Termination>,
    scale_ins: Vec<String>,
    drain_transitions: Vec<String>,
    desired_history: Vec<u32>,
    interrupt_when_drained: Option<watch::Sender<bool>>,
}

impl World {
    fn in_service(&self) -> u32 {
        self.hosts
            .values()
            .filter(|h| h.lifecycle == LifecycleState::InService)
            .count() as u32
    }

    fn record(&mut self) {
        let in_service = self.in_service();
        self.in_service_history.push(in_service);
    }

    fn allocate_ids(&mut self) -> (String, String) {
        self.next_id += 1;
        (
            format!("i-{:05}", self.next_id),
            format!("ci-{:05}", self.next_id),
        )
    }

    fn member_view(&self, instance_id: &str, m: &SimMember) -> ClusterMember {
        let raw = if m.draining { "DRAINING" } else { "ACTIVE" };
        ClusterMember {
            instance_id: instance_id.to_string(),
            host_id: m.host_id.clone(),
            running_tasks: m.running_tasks,
            pending_tasks: 0,
            status: DrainStatus::from_orchestrator(raw, m.running_tasks)
                .unwrap_or(DrainStatus::Active),
        }
    }

    fn remove_host(&mut self, host_id: &str) -> Option<(String, u32)> {
        let host = self.hosts.remove(host_id)?;
        let member_id = host.member?;
        let member = self.members.remove(&member_id)?;
        Some((member_id, member.running_tasks))
    }

    /// Fail the call if a throttle or failure was injected for it.
    fn gate(&mut self, operation: &'static str) -> Result<(), ApiError> {
        if self.throttle_remaining > 0 {
            self.throttle_remaining -= 1;
            return Err(ApiError::new(
                operation,
                ApiErrorKind::Throttled,
                "Rate exceeded",
            ));
        }
        if let Some(kind) = self.failures.get(operation) {
            return Err(ApiError::new(operation, *kind, "injected failure"));
        }
        Ok(())
    }

    fn tick(&mut self) {
        self.ticks += 1;

        // Registration lags one tick behind entering service.
        let mut joined = Vec::new();
        for (host_id, host) in self.hosts.iter_mut() {
            if host.lifecycle == LifecycleState::InService && host.member.is_none() {
                host.unregistered_for += 1;
                if host.unregistered_for >= self.join_ticks {
                    joined.push(host_id.clone());
                }
            }
        }
        for host_id in joined {
            let member_id = host_id.replacen("i-", "ci-", 1);
            if let Some(host) = self.hosts.get_mut(&host_id) {
                host.member = Some(member_id.clone());
            }
            debug!(%host_id, member = %member_id, "sim: member registered");
            self.members.insert(
                member_id,
                SimMember {
                    host_id,
                    running_tasks: 0,
                    draining: false,
                },
            );
        }

        for host in self.hosts.values_mut() {
            if host.lifecycle == LifecycleState::Pending {
                host.age += 1;
                if host.age >= self.launch_ticks {
                    host.lifecycle = LifecycleState::InService;
                }
            }
        }

        // Drain: move tasks off draining members onto active ones.
        let draining: Vec<String> = self
            .members
            .iter()
            .filter(|(id, m)| m.draining && m.running_tasks > 0 && !self.stuck.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in draining {
            let moved = match self.members.get_mut(&id) {
                Some(m) => {
                    let n = m.running_tasks.min(self.drain_per_tick);
                    m.running_tasks -= n;
                    if m.running_tasks == 0 {
                        if let Some(tx) = &self.interrupt_when_drained {
                            let _ = tx.send(true);
                        }
                    }
                    n
                }
                None => 0,
            };
            let target = self
                .members
                .iter_mut()
                .filter(|(_, m)| !m.draining)
                .min_by_key(|(_, m)| m.running_tasks);
            if let Some((_, m)) = target {
                m.running_tasks += moved;
            }
        }

        // Converge toward desired, bounded by max.
        let target = self.desired.min(self.max_size) as usize;
        let live = self.hosts.len();
        if live < target {
            for _ in live..target {
                let (host_id, _) = self.allocate_ids();
                debug!(%host_id, "sim: launching instance");
                self.hosts.insert(
                    host_id,
                    SimHost {
                        lifecycle: LifecycleState::Pending,
                        age: 0,
                        unregistered_for: 0,
                        member: None,
                    },
                );
            }
        } else if live > target {
            let newest: Vec<String> = self
                .hosts
                .keys()
                .rev()
                .take(live - target)
                .cloned()
                .collect();
            for host_id in newest {
                debug!(%host_id, "sim: scaling in");
                self.remove_host(&host_id);
                self.scale_ins.push(host_id);
            }
        }

        self.record();
    }
}

/// Handle to the simulated world. Cheap to clone.
#[derive(Clone)]
pub struct SimCluster {
    world: Arc<Mutex<World>>,
}

pub struct SimClusterBuilder {
    members: u32,
    tasks_per_member: u32,
    desired: Option<u32>,
    min_size: u32,
    max_size: u32,
    launch_ticks: u32,
    join_ticks: u32,
    drain_per_tick: u32,
}

impl Default for SimClusterBuilder {
    fn default() -> Self {
        Self {
            members: 3,
            tasks_per_member: 4,
            desired: None,
            min_size: 1,
            max_size: 10,
            launch_ticks: 1,
            join_ticks: 1,
            drain_per_tick: 2,
        }
    }
}

impl SimClusterBuilder {
    pub fn members(mut self, n: u32) -> Self {
        self.members = n;
        self
    }

    pub fn tasks_per_member(mut self, n: u32) -> Self {
        self.tasks_per_member = n;
        self
    }

    /// Desired capacity; defaults to the member count.
    pub fn desired(mut self, n: u32) -> Self {
        self.desired = Some(n);
        self
    }

    pub fn min_size(mut self, n: u32) -> Self {
        self.min_size = n;
        self
    }

    pub fn max_size(mut self, n: u32) -> Self {
        self.max_size = n;
        self
    }

    pub fn launch_ticks(mut self, n: u32) -> Self {
        self.launch_ticks = n;
        self
    }

    pub fn join_ticks(mut self, n: u32) -> Self {
        self.join_ticks = n;
        self
    }

    pub fn drain_per_tick(mut self, n: u32) -> Self {
        self.drain_per_tick = n;
        self
    }

    pub fn build(self) -> SimCluster {
        let mut world = World {
            group_name: "sim-asg".to_string(),
            desired: self.desired.unwrap_or(self.members),
            min_size: self.min_size,
            max_size: self.max_size,
            hosts: BTreeMap::new(),
            members: BTreeMap::new(),
            next_id: 0,
            launch_ticks: self.launch_ticks,
            join_ticks: self.join_ticks,
            drain_per_tick: self.drain_per_tick.max(1),
            stuck: BTreeSet::new(),
            throttle_remaining: 0,
            failures: HashMap::new(),
            suspended: BTreeSet::new(),
            ticks: 0,
            mutations: 0,
            in_service_history: Vec::new(),
            terminations: Vec::new(),
            scale_ins: Vec::new(),
            drain_transitions: Vec::new(),
            desired_history: Vec::new(),
            interrupt_when_drained: None,
        };

        for _ in 0..self.members {
            let (host_id, member_id) = world.allocate_ids();
            world.hosts.insert(
                host_id.clone(),
                SimHost {
                    lifecycle: LifecycleState::InService,
                    age: 0,
                    unregistered_for: 0,
                    member: Some(member_id.clone()),
                },
            );
            world.members.insert(
                member_id,
                SimMember {
                    host_id,
                    running_tasks: self.tasks_per_member,
                    draining: false,
                },
            );
        }
        world.record();
        let desired = world.desired;
        world.desired_history.push(desired);

        SimCluster {
            world: Arc::new(Mutex::new(world)),
        }
    }
}

impl SimCluster {
    pub fn builder() -> SimClusterBuilder {
        SimClusterBuilder::default()
    }

    fn world(&self) -> MutexGuard<'_, World> {
        // A panic while holding the lock only happens inside a failing test.
        self.world.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advance the world by one step.
    pub fn tick(&self) {
        self.world().tick();
    }

    // ── fault injection ────────────────────────────────────────────

    /// The member keeps its tasks while draining.
    pub fn set_stuck(&self, instance_id: &str) {
        self.world().stuck.insert(instance_id.to_string());
    }

    pub fn clear_stuck(&self, instance_id: &str) {
        self.world().stuck.remove(instance_id);
    }

    /// The next `n` API calls fail with a throttling error.
    pub fn throttle_next(&self, n: u32) {
        self.world().throttle_remaining = n;
    }

    /// Every call to `operation` fails with `kind`.
    pub fn fail_operation(&self, operation: &'static str, kind: ApiErrorKind) {
        self.world().failures.insert(operation, kind);
    }

    pub fn clear_failures(&self) {
        self.world().failures.clear();
    }

    /// Fire `tx` as soon as any draining member reaches zero tasks.
    pub fn interrupt_when_drained(&self, tx: watch::Sender<bool>) {
        self.world().interrupt_when_drained = Some(tx);
    }

    pub fn clear_interrupt(&self) {
        self.world().interrupt_when_drained = None;
    }

    /// Set the task count on a member directly.
    pub fn set_running_tasks(&self, instance_id: &str, tasks: u32) {
        if let Some(m) = self.world().members.get_mut(instance_id) {
            m.running_tasks = tasks;
        }
    }

    /// Change desired capacity out of band, as another operator would.
    pub fn external_set_desired(&self, desired: u32) {
        let mut world = self.world();
        world.desired = desired;
        world.desired_history.push(desired);
    }

    // ── observations ───────────────────────────────────────────────

    pub fn ticks(&self) -> u32 {
        self.world().ticks
    }

    pub fn in_service(&self) -> u32 {
        self.world().in_service()
    }

    pub fn desired(&self) -> u32 {
        self.world().desired
    }

    pub fn max_size(&self) -> u32 {
        self.world().max_size
    }

    /// Registered member ids in order.
    pub fn member_ids(&self) -> Vec<String> {
        self.world().members.keys().cloned().collect()
    }

    pub fn member(&self, instance_id: &str) -> Option<ClusterMember> {
        let world = self.world();
        world
            .members
            .get(instance_id)
            .map(|m| world.member_view(instance_id, m))
    }

    /// Total running tasks across the cluster.
    pub fn total_tasks(&self) -> u32 {
        self.world().members.values().map(|m| m.running_tasks).sum()
    }

    /// In-service count after every mutation and tick.
    pub fn in_service_history(&self) -> Vec<u32> {
        self.world().in_service_history.clone()
    }

    pub fn desired_history(&self) -> Vec<u32> {
        self.world().desired_history.clone()
    }

    pub fn terminations(&self) -> Vec<Termination> {
        self.world().terminations.clone()
    }

    pub fn scale_ins(&self) -> Vec<String> {
        self.world().scale_ins.clone()
    }

    /// Members that went from ACTIVE to DRAINING, in order.
    pub fn drain_transitions(&self) -> Vec<String> {
        self.world().drain_transitions.clone()
    }

    /// Count of mutating API calls that reached the world.
    pub fn mutations(&self) -> u32 {
        self.world().mutations
    }

    pub fn suspended_processes(&self) -> Vec<String> {
        self.world().suspended.iter().cloned().collect()
    }
}

#[async_trait]
impl OrchestratorApi for SimCluster {
    async fn list_members(&self) -> Result<Vec<ClusterMember>, ApiError> {
        let mut world = self.world();
        world.gate("list_members")?;
        Ok(world
            .members
            .iter()
            .map(|(id, m)| world.member_view(id, m))
            .collect())
    }

    async fn describe_member(&self, instance_id: &str) -> Result<Option<ClusterMember>, ApiError> {
        let mut world = self.world();
        world.gate("describe_member")?;
        Ok(world
            .members
            .get(instance_id)
            .map(|m| world.member_view(instance_id, m)))
    }

    async fn set_draining(&self, instance_id: &str) -> Result<(), ApiError> {
        let mut guard = self.world();
        let world = &mut *guard;
        world.gate("set_draining")?;
        world.mutations += 1;
        let member = world.members.get_mut(instance_id).ok_or_else(|| {
            ApiError::new(
                "set_draining",
                ApiErrorKind::NotFound,
                format!("container instance {instance_id} not found"),
            )
        })?;
        if !member.draining {
            member.draining = true;
            world.drain_transitions.push(instance_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl CapacityGroupApi for SimCluster {
    async fn describe_group(&self) -> Result<CapacityGroup, ApiError> {
        let mut world = self.world();
        world.gate("describe_group")?;
        Ok(CapacityGroup {
            name: world.group_name.clone(),
            desired: world.desired,
            min_size: world.min_size,
            max_size: world.max_size,
            instances: world
                .hosts
                .iter()
                .map(|(id, h)| GroupInstance {
                    host_id: id.clone(),
                    lifecycle: h.lifecycle,
                })
                .collect(),
        })
    }

    async fn update_capacity(&self, desired: u32, max_size: Option<u32>) -> Result<(), ApiError> {
        let mut world = self.world();
        world.gate("update_capacity")?;
        world.mutations += 1;
        if let Some(max) = max_size {
            world.max_size = max;
        }
        // Desired above max is accepted; the group just never gets there.
        world.desired = desired;
        world.desired_history.push(desired);
        world.record();
        Ok(())
    }

    async fn terminate_instance(&self, host_id: &str, decrement_desired: bool) -> Result<(), ApiError> {
        let mut world = self.world();
        world.gate("terminate_instance")?;
        world.mutations += 1;
        if !world.hosts.contains_key(host_id) {
            return Err(ApiError::new(
                "terminate_instance",
                ApiErrorKind::NotFound,
                format!("instance {host_id} is not part of {}", world.group_name),
            ));
        }
        if decrement_desired && world.desired <= world.min_size {
            return Err(ApiError::new(
                "terminate_instance",
                ApiErrorKind::Rejected,
                "desired capacity would drop below min size",
            ));
        }

        let removed = world.remove_host(host_id);
        let (member, running_tasks) = match removed {
            Some((m, t)) => (Some(m), t),
            None => (None, 0),
        };
        world.terminations.push(Termination {
            host_id: host_id.to_string(),
            member,
            running_tasks,
            decrement_desired,
        });
        if decrement_desired {
            world.desired -= 1;
            let desired = world.desired;
            world.desired_history.push(desired);
        }
        world.record();
        Ok(())
    }

    async fn suspend_processes(&self, processes: &[String]) -> Result<(), ApiError> {
        let mut world = self.world();
        world.gate("suspend_processes")?;
        world.mutations += 1;
        world.suspended.extend(processes.iter().cloned());
        Ok(())
    }

    async fn resume_processes(&self, processes: &[String]) -> Result<(), ApiError> {
        let mut world = self.world();
        world.gate("resume_processes")?;
        world.mutations += 1;
        for p in processes {
            world.suspended.remove(p);
        }
        Ok(())
    }
}
