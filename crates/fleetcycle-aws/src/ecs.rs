//! ECS container-instance membership.

use async_trait::async_trait;
use aws_sdk_ecs::Client;
use aws_sdk_ecs::types::{ContainerInstance, ContainerInstanceStatus};
use tracing::debug;

use fleetcycle_core::{ApiError, ClusterMember, DrainStatus, OrchestratorApi};

use crate::error::{from_sdk, item_failure};

/// DescribeContainerInstances accepts at most this many ARNs per call.
const DESCRIBE_BATCH: usize = 100;

/// One ECS cluster.
#[derive(Clone)]
pub struct EcsCluster {
    client: Client,
    cluster: String,
}

impl EcsCluster {
    pub fn new(client: Client, cluster: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
        }
    }

    async fn list_arns(&self) -> Result<Vec<String>, ApiError> {
        let mut arns = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_container_instances()
                .cluster(&self.cluster)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| from_sdk("list_members", e))?;
            arns.extend(page.container_instance_arns().iter().cloned());
            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(arns)
    }

    async fn describe(&self, arns: &[String], operation: &str) -> Result<Vec<ContainerInstance>, ApiError> {
        let mut out = Vec::with_capacity(arns.len());
        for chunk in arns.chunks(DESCRIBE_BATCH) {
            let resp = self
                .client
                .describe_container_instances()
                .cluster(&self.cluster)
                .set_container_instances(Some(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| from_sdk(operation, e))?;
            for failure in resp.failures() {
                // Instances that deregistered between list and describe.
                debug!(arn = ?failure.arn(), reason = ?failure.reason(), "describe failure");
            }
            out.extend(resp.container_instances().iter().cloned());
        }
        Ok(out)
    }
}

/// Convert one ECS record. Instances outside ACTIVE/DRAINING, or
/// missing an EC2 id, are not members.
pub fn member_view(
    arn: Option<&str>,
    ec2_instance_id: Option<&str>,
    status: Option<&str>,
    running_tasks: i32,
    pending_tasks: i32,
) -> Option<ClusterMember> {
    let running_tasks = running_tasks.max(0) as u32;
    let status = DrainStatus::from_orchestrator(status?, running_tasks)?;
    Some(ClusterMember {
        instance_id: arn?.to_string(),
        host_id: ec2_instance_id?.to_string(),
        running_tasks,
        pending_tasks: pending_tasks.max(0) as u32,
        status,
    })
}

fn to_member(ci: &ContainerInstance) -> Option<ClusterMember> {
    member_view(
        ci.container_instance_arn(),
        ci.ec2_instance_id(),
        ci.status(),
        ci.running_tasks_count(),
        ci.pending_tasks_count(),
    )
}

#[async_trait]
impl OrchestratorApi for EcsCluster {
    async fn list_members(&self) -> Result<Vec<ClusterMember>, ApiError> {
        let arns = self.list_arns().await?;
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let instances = self.describe(&arns, "list_members").await?;
        Ok(instances.iter().filter_map(to_member).collect())
    }

    async fn describe_member(&self, instance_id: &str) -> Result<Option<ClusterMember>, ApiError> {
        let instances = self
            .describe(&[instance_id.to_string()], "describe_member")
            .await?;
        Ok(instances.iter().find_map(to_member))
    }

    async fn set_draining(&self, instance_id: &str) -> Result<(), ApiError> {
        let resp = self
            .client
            .update_container_instances_state()
            .cluster(&self.cluster)
            .container_instances(instance_id)
            .status(ContainerInstanceStatus::Draining)
            .send()
            .await
            .map_err(|e| from_sdk("set_draining", e))?;
        if let Some(failure) = resp.failures().first() {
            return Err(item_failure("set_draining", failure.arn(), failure.reason()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_instance_becomes_member() {
        let m = member_view(Some("arn:ci/1"), Some("i-1"), Some("ACTIVE"), 3, 1).unwrap();
        assert_eq!(m.instance_id, "arn:ci/1");
        assert_eq!(m.host_id, "i-1");
        assert_eq!(m.running_tasks, 3);
        assert_eq!(m.pending_tasks, 1);
        assert_eq!(m.status, DrainStatus::Active);
    }

    #[test]
    fn empty_draining_instance_is_drained() {
        let m = member_view(Some("arn:ci/1"), Some("i-1"), Some("DRAINING"), 0, 0).unwrap();
        assert_eq!(m.status, DrainStatus::Drained);
    }

    #[test]
    fn non_members_are_skipped() {
        assert!(member_view(Some("arn:ci/1"), Some("i-1"), Some("REGISTERING"), 0, 0).is_none());
        assert!(member_view(Some("arn:ci/1"), None, Some("ACTIVE"), 0, 0).is_none());
        assert!(member_view(Some("arn:ci/1"), Some("i-1"), None, 0, 0).is_none());
    }
}
