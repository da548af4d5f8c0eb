//! EC2 Auto Scaling group capacity.

use async_trait::async_trait;
use aws_sdk_autoscaling::Client;

use fleetcycle_core::{
    ApiError, ApiErrorKind, CapacityGroup, CapacityGroupApi, GroupInstance, LifecycleState,
};

use crate::error::from_sdk;

#[derive(Clone)]
pub struct AutoScalingGroup {
    client: Client,
    name: String,
}

impl AutoScalingGroup {
    pub fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }
}

fn to_i32(operation: &str, value: u32) -> Result<i32, ApiError> {
    i32::try_from(value).map_err(|_| {
        ApiError::new(
            operation,
            ApiErrorKind::Rejected,
            format!("capacity {value} out of range"),
        )
    })
}

fn count(value: Option<i32>) -> u32 {
    value.unwrap_or(0).max(0) as u32
}

/// Assemble a snapshot from the group's sizes and its instance list.
pub fn group_view<'a>(
    name: &str,
    desired: Option<i32>,
    min_size: Option<i32>,
    max_size: Option<i32>,
    instances: impl IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
) -> CapacityGroup {
    CapacityGroup {
        name: name.to_string(),
        desired: count(desired),
        min_size: count(min_size),
        max_size: count(max_size),
        instances: instances
            .into_iter()
            .filter_map(|(id, lifecycle)| {
                Some(GroupInstance {
                    host_id: id?.to_string(),
                    lifecycle: lifecycle.map_or(LifecycleState::Other, LifecycleState::parse),
                })
            })
            .collect(),
    }
}

#[async_trait]
impl CapacityGroupApi for AutoScalingGroup {
    async fn describe_group(&self) -> Result<CapacityGroup, ApiError> {
        let resp = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(&self.name)
            .send()
            .await
            .map_err(|e| from_sdk("describe_group", e))?;
        let group = resp.auto_scaling_groups().first().ok_or_else(|| {
            ApiError::new(
                "describe_group",
                ApiErrorKind::NotFound,
                format!("auto scaling group {} not found", self.name),
            )
        })?;

        Ok(group_view(
            &self.name,
            group.desired_capacity(),
            group.min_size(),
            group.max_size(),
            group
                .instances()
                .iter()
                .map(|i| (i.instance_id(), i.lifecycle_state().map(|s| s.as_str()))),
        ))
    }

    async fn update_capacity(&self, desired: u32, max_size: Option<u32>) -> Result<(), ApiError> {
        let max_size = max_size
            .map(|m| to_i32("update_capacity", m))
            .transpose()?;
        self.client
            .update_auto_scaling_group()
            .auto_scaling_group_name(&self.name)
            .desired_capacity(to_i32("update_capacity", desired)?)
            .set_max_size(max_size)
            .send()
            .await
            .map_err(|e| from_sdk("update_capacity", e))?;
        Ok(())
    }

    async fn terminate_instance(&self, host_id: &str, decrement_desired: bool) -> Result<(), ApiError> {
        self.client
            .terminate_instance_in_auto_scaling_group()
            .instance_id(host_id)
            .should_decrement_desired_capacity(decrement_desired)
            .send()
            .await
            .map_err(|e| from_sdk("terminate_instance", e))?;
        Ok(())
    }

    async fn suspend_processes(&self, processes: &[String]) -> Result<(), ApiError> {
        self.client
            .suspend_processes()
            .auto_scaling_group_name(&self.name)
            .set_scaling_processes(Some(processes.to_vec()))
            .send()
            .await
            .map_err(|e| from_sdk("suspend_processes", e))?;
        Ok(())
    }

    async fn resume_processes(&self, processes: &[String]) -> Result<(), ApiError> {
        self.client
            .resume_processes()
            .auto_scaling_group_name(&self.name)
            .set_scaling_processes(Some(processes.to_vec()))
            .send()
            .await
            .map_err(|e| from_sdk("resume_processes", e))?;
        Ok(())
    }
}
