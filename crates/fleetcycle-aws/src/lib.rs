//! fleetcycle-aws — live implementations of the recycler's API traits.
//!
//! - **`ecs`** — [`EcsCluster`], container-instance membership and drain state
//! - **`autoscaling`** — [`AutoScalingGroup`], desired capacity and termination
//! - **`error`** — mapping SDK failures onto [`fleetcycle_core::ApiError`]

pub mod autoscaling;
pub mod ecs;
pub mod error;

pub use autoscaling::AutoScalingGroup;
pub use ecs::EcsCluster;

use aws_config::{BehaviorVersion, Region};
use tracing::debug;

/// Load credentials and region from the standard provider chain and
/// build both clients.
pub async fn connect(
    cluster: &str,
    group: &str,
    region: Option<&str>,
) -> (EcsCluster, AutoScalingGroup) {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    let sdk_config = loader.load().await;
    debug!(region = ?sdk_config.region(), "loaded AWS configuration");

    (
        EcsCluster::new(aws_sdk_ecs::Client::new(&sdk_config), cluster),
        AutoScalingGroup::new(aws_sdk_autoscaling::Client::new(&sdk_config), group),
    )
}
