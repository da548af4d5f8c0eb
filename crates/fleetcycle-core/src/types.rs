//! Domain types shared by the recycle components.
//!
//! `ClusterMember` and `CapacityGroup` are observations of external
//! state, re-read on every poll. `RecycleWorkItem` is the only type the
//! recycler owns.

use serde::{Deserialize, Serialize};

/// Orchestrator-assigned container-instance identifier (e.g. an ARN).
pub type MemberId = String;

/// Compute-instance identifier backing a member (e.g. `i-0abc...`).
pub type HostId = String;

// ── Cluster members ────────────────────────────────────────────────

/// Drain status of a container instance as seen by the recycler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrainStatus {
    /// Accepting task placement.
    Active,
    /// Draining with tasks still running.
    Draining,
    /// Draining and empty; safe to terminate.
    Drained,
}

impl DrainStatus {
    /// Derive the drain status from the orchestrator's raw status string
    /// and its running task count.
    ///
    /// Returns `None` for statuses that are not cluster membership
    /// (registering, deregistering, inactive).
    pub fn from_orchestrator(status: &str, running_tasks: u32) -> Option<Self> {
        match status {
            "ACTIVE" => Some(Self::Active),
            "DRAINING" if running_tasks == 0 => Some(Self::Drained),
            "DRAINING" => Some(Self::Draining),
            _ => None,
        }
    }
}

impl std::fmt::Display for DrainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Draining => "DRAINING",
            Self::Drained => "DRAINED",
        };
        f.write_str(s)
    }
}

/// One container instance registered with the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub instance_id: MemberId,
    pub host_id: HostId,
    pub running_tasks: u32,
    pub pending_tasks: u32,
    pub status: DrainStatus,
}

impl ClusterMember {
    /// True once the member is draining and has no running tasks.
    pub fn is_drained(&self) -> bool {
        self.status != DrainStatus::Active && self.running_tasks == 0
    }
}

// ── Capacity group ─────────────────────────────────────────────────

/// Lifecycle of a compute instance inside the capacity group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
    /// Standby, detaching, warm pool and hook states.
    Other,
}

impl LifecycleState {
    /// Map the capacity group's lifecycle string onto the states the
    /// recycler distinguishes.
    pub fn parse(s: &str) -> Self {
        match s {
            "InService" => Self::InService,
            "Pending" | "Pending:Wait" | "Pending:Proceed" => Self::Pending,
            "Terminating" | "Terminating:Wait" | "Terminating:Proceed" => Self::Terminating,
            "Terminated" => Self::Terminated,
            _ => Self::Other,
        }
    }
}

/// A compute instance owned by the capacity group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInstance {
    pub host_id: HostId,
    pub lifecycle: LifecycleState,
}

/// Snapshot of the autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityGroup {
    pub name: String,
    pub desired: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub instances: Vec<GroupInstance>,
}

impl CapacityGroup {
    /// Number of instances currently in service.
    pub fn in_service(&self) -> u32 {
        self.instances
            .iter()
            .filter(|i| i.lifecycle == LifecycleState::InService)
            .count() as u32
    }
}

// ── Work items ─────────────────────────────────────────────────────

/// Progress of a single baseline member through the recycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkItemState {
    Pending,
    CapacityRequested,
    Draining,
    Terminated,
    Failed,
}

impl std::fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::CapacityRequested => "CAPACITY_REQUESTED",
            Self::Draining => "DRAINING",
            Self::Terminated => "TERMINATED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One baseline member queued for replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycleWorkItem {
    pub member: ClusterMember,
    pub state: WorkItemState,
    /// Member that joined the cluster while this item held the extra
    /// capacity slot.
    pub replacement: Option<MemberId>,
    /// Terminated after a drain timeout with force enabled.
    pub forced: bool,
    pub failure: Option<String>,
}

impl RecycleWorkItem {
    pub fn new(member: ClusterMember) -> Self {
        Self {
            member,
            state: WorkItemState::Pending,
            replacement: None,
            forced: false,
            failure: None,
        }
    }

    /// Whether this item has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, WorkItemState::Terminated | WorkItemState::Failed)
    }
}
