//! Cluster inventory — read-only view of orchestrator membership.
//!
//! Snapshots are sorted by container-instance id so a baseline taken at
//! run start is deterministic and two snapshots can be compared. New
//! arrivals are found by set difference on ids, never by position, so
//! concurrently joining instances are not confused with each other.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use fleetcycle_core::*;

/// Members in `members` that are ACTIVE and not in `known`.
pub fn diff_new(members: &[ClusterMember], known: &BTreeSet<String>) -> Vec<ClusterMember> {
    members
        .iter()
        .filter(|m| m.status == DrainStatus::Active && !known.contains(&m.instance_id))
        .cloned()
        .collect()
}

/// Reads cluster membership through the orchestrator API.
pub struct ClusterInventory {
    cluster: String,
    api: Arc<dyn OrchestratorApi>,
    poller: Poller,
}

impl ClusterInventory {
    pub fn new(cluster: impl Into<String>, api: Arc<dyn OrchestratorApi>, poller: Poller) -> Self {
        Self {
            cluster: cluster.into(),
            api,
            poller,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// All registered members, ordered by instance id.
    pub async fn list_members(&self) -> Result<Vec<ClusterMember>, ApiError> {
        let mut members = self
            .poller
            .retry("list_members", || self.api.list_members())
            .await?;
        members.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        members.dedup_by(|a, b| a.instance_id == b.instance_id);
        debug!(cluster = %self.cluster, count = members.len(), "listed cluster members");
        Ok(members)
    }

    pub async fn member_count(&self) -> Result<usize, ApiError> {
        Ok(self.list_members().await?.len())
    }

    /// Fresh view of one member; `None` once it has deregistered.
    pub async fn member(&self, instance_id: &str) -> Result<Option<ClusterMember>, ApiError> {
        self.poller
            .retry("describe_member", || self.api.describe_member(instance_id))
            .await
    }

    /// ACTIVE members whose ids are not in `known`.
    pub async fn new_members(&self, known: &BTreeSet<String>) -> Result<Vec<ClusterMember>, ApiError> {
        let members = self.list_members().await?;
        Ok(diff_new(&members, known))
    }

    /// Wait until at least one new ACTIVE member has registered.
    ///
    /// Returns every new member seen on the successful poll, in id order.
    pub async fn await_new_member(
        &self,
        known: &BTreeSet<String>,
        policy: PollPolicy,
    ) -> RecycleResult<Vec<ClusterMember>> {
        let result = self
            .poller
            .until(policy, move || async move {
                let members = self.list_members().await?;
                let fresh = diff_new(&members, known);
                if fresh.is_empty() {
                    Ok(Check::Waiting(members.len()))
                } else {
                    Ok(Check::Ready(fresh))
                }
            })
            .await;

        match result {
            Ok(fresh) => {
                for m in &fresh {
                    info!(
                        cluster = %self.cluster,
                        member = %m.instance_id,
                        host = %m.host_id,
                        "new member joined cluster"
                    );
                }
                Ok(fresh)
            }
            Err(PollError::Api(e)) => Err(e.into()),
            Err(PollError::TimedOut { last, elapsed }) => Err(TimeoutError::MemberNotJoined {
                members: last,
                elapsed,
            }
            .into()),
            Err(PollError::Interrupted) => Err(RecycleError::Interrupted),
        }
    }
}
