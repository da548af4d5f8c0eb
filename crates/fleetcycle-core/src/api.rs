//! Traits for the two external collaborators.
//!
//! Implementations are bound to one cluster / one capacity group at
//! construction. Each method is a single remote call (or a read-only
//! pagination of one) so a dropped run never leaves a half-applied
//! mutation behind.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{CapacityGroup, ClusterMember};

/// Container orchestrator (ECS-style) operations on one cluster.
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    /// All registered container instances, in any order.
    async fn list_members(&self) -> Result<Vec<ClusterMember>, ApiError>;

    /// Describe one container instance. `None` if it is no longer registered.
    async fn describe_member(&self, instance_id: &str) -> Result<Option<ClusterMember>, ApiError>;

    /// Put a container instance into the draining state.
    async fn set_draining(&self, instance_id: &str) -> Result<(), ApiError>;
}

/// Autoscaling group operations on one group.
#[async_trait]
pub trait CapacityGroupApi: Send + Sync {
    async fn describe_group(&self) -> Result<CapacityGroup, ApiError>;

    /// Set desired capacity, optionally changing max size in the same call.
    async fn update_capacity(&self, desired: u32, max_size: Option<u32>) -> Result<(), ApiError>;

    /// Terminate one instance through the group.
    async fn terminate_instance(&self, host_id: &str, decrement_desired: bool) -> Result<(), ApiError>;

    async fn suspend_processes(&self, processes: &[String]) -> Result<(), ApiError>;

    async fn resume_processes(&self, processes: &[String]) -> Result<(), ApiError>;
}
