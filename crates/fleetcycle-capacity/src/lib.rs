//! Capacity controller — the only writer of the group's desired count.
//!
//! Desired capacity is never cached: every bump re-reads the group first
//! so a concurrent change by another operator is built upon rather than
//! overwritten. Capacity only goes down through [`restore_desired`]
//! and through the decrementing terminations issued by the drain
//! coordinator.
//!
//! [`restore_desired`]: CapacityController::restore_desired

use std::sync::Arc;

use tracing::{debug, info, warn};

use fleetcycle_core::*;

pub struct CapacityController {
    group: String,
    api: Arc<dyn CapacityGroupApi>,
    poller: Poller,
    raise_max_size: bool,
    suspend: Vec<String>,
}

impl CapacityController {
    pub fn new(group: impl Into<String>, api: Arc<dyn CapacityGroupApi>, poller: Poller) -> Self {
        Self {
            group: group.into(),
            api,
            poller,
            raise_max_size: false,
            suspend: Vec::new(),
        }
    }

    /// Raise max size when a bump would exceed it.
    pub fn with_raise_max_size(mut self, raise: bool) -> Self {
        self.raise_max_size = raise;
        self
    }

    /// Processes to suspend for the duration of the run.
    pub fn with_suspended_processes(mut self, processes: Vec<String>) -> Self {
        self.suspend = processes;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Fresh read of the group.
    pub async fn describe(&self) -> Result<CapacityGroup, ApiError> {
        self.poller
            .retry("describe_group", || self.api.describe_group())
            .await
    }

    /// Add `by` to the current desired count. Returns the new desired count.
    ///
    /// If that would exceed max size and raising is disabled, no update is
    /// sent and the returned target is one the group will not reach.
    pub async fn increase_desired(&self, by: u32) -> Result<u32, ApiError> {
        let current = self.describe().await?;
        let desired = current.desired + by;

        let max_size = if desired > current.max_size {
            if self.raise_max_size {
                info!(
                    group = %self.group,
                    from = current.max_size,
                    to = desired,
                    "raising max size for temporary capacity"
                );
                Some(desired)
            } else {
                // The group API rejects desired above max.
                warn!(
                    group = %self.group,
                    desired,
                    max_size = current.max_size,
                    "desired capacity exceeds max size; leaving the group unchanged"
                );
                return Ok(desired);
            }
        } else {
            None
        };

        self.poller
            .retry("update_capacity", || self.api.update_capacity(desired, max_size))
            .await?;

        info!(
            group = %self.group,
            from = current.desired,
            to = desired,
            "increased desired capacity"
        );
        Ok(desired)
    }

    /// Wait until at least `target` instances are in service.
    pub async fn await_capacity_reached(
        &self,
        target: u32,
        policy: PollPolicy,
    ) -> RecycleResult<CapacityGroup> {
        let result = self
            .poller
            .until(policy, move || async move {
                let group = self.describe().await?;
                let in_service = group.in_service();
                debug!(group = %self.group, in_service, target, "polling capacity");
                if in_service >= target {
                    Ok(Check::Ready(group))
                } else {
                    Ok(Check::Waiting((in_service, group.desired, group.max_size)))
                }
            })
            .await;

        match result {
            Ok(group) => {
                info!(
                    group = %self.group,
                    in_service = group.in_service(),
                    target,
                    "capacity reached"
                );
                Ok(group)
            }
            Err(PollError::Api(e)) => Err(e.into()),
            Err(PollError::TimedOut {
                last: (in_service, desired, max_size),
                elapsed,
            }) => Err(TimeoutError::CapacityNotReached {
                target,
                in_service,
                desired,
                max_size,
                elapsed,
            }
            .into()),
            Err(PollError::Interrupted) => Err(RecycleError::Interrupted),
        }
    }

    /// Put desired (and max, if it was raised) back to the baseline.
    pub async fn restore_desired(&self, baseline: &CapacityGroup) -> Result<(), ApiError> {
        let current = self.describe().await?;
        let max_size = (current.max_size != baseline.max_size).then_some(baseline.max_size);

        if current.desired == baseline.desired && max_size.is_none() {
            debug!(group = %self.group, desired = current.desired, "capacity already at baseline");
            return Ok(());
        }

        self.poller
            .retry("update_capacity", || {
                self.api.update_capacity(baseline.desired, max_size)
            })
            .await?;

        info!(
            group = %self.group,
            from = current.desired,
            to = baseline.desired,
            max_size = baseline.max_size,
            "restored desired capacity"
        );
        Ok(())
    }

    /// Put max size back to the baseline if it was raised, leaving
    /// desired where it is.
    pub async fn restore_max_size(&self, baseline: &CapacityGroup) -> Result<(), ApiError> {
        let current = self.describe().await?;
        if current.max_size == baseline.max_size {
            return Ok(());
        }
        let desired = current.desired.min(baseline.max_size);

        self.poller
            .retry("update_capacity", || {
                self.api.update_capacity(desired, Some(baseline.max_size))
            })
            .await?;

        info!(
            group = %self.group,
            from = current.max_size,
            to = baseline.max_size,
            "restored max size"
        );
        Ok(())
    }

    pub async fn suspend_processes(&self) -> Result<(), ApiError> {
        if self.suspend.is_empty() {
            return Ok(());
        }
        self.poller
            .retry("suspend_processes", || self.api.suspend_processes(&self.suspend))
            .await?;
        info!(group = %self.group, processes = ?self.suspend, "suspended scaling processes");
        Ok(())
    }

    pub async fn resume_processes(&self) -> Result<(), ApiError> {
        if self.suspend.is_empty() {
            return Ok(());
        }
        self.poller
            .retry("resume_processes", || self.api.resume_processes(&self.suspend))
            .await?;
        info!(group = %self.group, processes = ?self.suspend, "resumed scaling processes");
        Ok(())
    }
}
