//! Recycle orchestrator — drives work items through capacity, drain,
//! and termination, one at a time.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use fleetcycle_capacity::CapacityController;
use fleetcycle_core::*;
use fleetcycle_drain::DrainCoordinator;
use fleetcycle_inventory::ClusterInventory;

use crate::summary::RecycleSummary;

/// Sequential rolling replacement of every baseline member.
pub struct RecycleOrchestrator {
    config: RecycleConfig,
    inventory: ClusterInventory,
    capacity: CapacityController,
    drain: DrainCoordinator,
    poller: Poller,
    baseline: Option<CapacityGroup>,
    items: Vec<RecycleWorkItem>,
    restored: bool,
}

impl RecycleOrchestrator {
    /// Assemble the components from a configuration and the two API
    /// clients.
    pub fn new(
        config: RecycleConfig,
        orchestrator: Arc<dyn OrchestratorApi>,
        capacity: Arc<dyn CapacityGroupApi>,
        poller: Poller,
    ) -> Self {
        let poller = poller.with_retry(config.retry.clone());
        let inventory = ClusterInventory::new(&config.cluster, orchestrator.clone(), poller.clone());
        let capacity_controller =
            CapacityController::new(&config.capacity_group, capacity.clone(), poller.clone())
                .with_raise_max_size(config.raise_max_size)
                .with_suspended_processes(config.suspend_processes.clone());
        let drain = DrainCoordinator::new(orchestrator, capacity, poller.clone())
            .with_force_after_timeout(config.force_after_timeout);

        Self {
            config,
            inventory,
            capacity: capacity_controller,
            drain,
            poller,
            baseline: None,
            items: Vec::new(),
            restored: false,
        }
    }

    pub fn items(&self) -> &[RecycleWorkItem] {
        &self.items
    }

    pub fn summary(&self) -> RecycleSummary {
        RecycleSummary {
            cluster: self.config.cluster.clone(),
            capacity_group: self.config.capacity_group.clone(),
            dry_run: self.config.dry_run,
            baseline_desired: self.baseline.as_ref().map(|g| g.desired),
            baseline_max_size: self.baseline.as_ref().map(|g| g.max_size),
            restored: self.restored,
            items: self.items.clone(),
        }
    }

    /// Validate configuration, read the group and members, and build the
    /// work items. Makes no changes.
    async fn snapshot(&mut self) -> RecycleResult<CapacityGroup> {
        self.config.validate()?;

        let group = self.capacity.describe().await?;
        let members = self.inventory.list_members().await?;

        if members.len() > self.config.member_ceiling {
            return Err(ConfigError::ClusterTooLarge {
                members: members.len(),
                ceiling: self.config.member_ceiling,
            }
            .into());
        }

        if members.len() as u32 != group.in_service() {
            warn!(
                cluster = %self.config.cluster,
                members = members.len(),
                in_service = group.in_service(),
                "cluster membership and in-service capacity disagree"
            );
        }
        // Members left draining by an earlier run already have their
        // replacement in service; that surplus is not part of the baseline.
        let (resumed, active): (Vec<_>, Vec<_>) = members
            .into_iter()
            .partition(|m| m.status != DrainStatus::Active);
        let mut baseline = group;
        baseline.desired = baseline.desired.saturating_sub(resumed.len() as u32);
        if !resumed.is_empty() {
            info!(
                draining = resumed.len(),
                restore_desired = baseline.desired,
                "baseline includes members already draining from an earlier run"
            );
        }

        info!(
            cluster = %self.config.cluster,
            group = %self.config.capacity_group,
            members = resumed.len() + active.len(),
            desired = baseline.desired,
            max_size = baseline.max_size,
            "baseline captured"
        );

        self.items = resumed
            .into_iter()
            .chain(active)
            .map(RecycleWorkItem::new)
            .collect();
        self.baseline = Some(baseline.clone());
        Ok(baseline)
    }

    /// A throttling error cut short by the operator's interrupt is
    /// reported as the interrupt.
    fn interrupted_or(&self, err: RecycleError) -> RecycleError {
        if self.poller.check_interrupted().is_ok() {
            return err;
        }
        match err {
            RecycleError::Api(api) if api.is_transient() => RecycleError::Interrupted,
            RecycleError::WorkItem {
                member,
                host,
                source,
            } => match *source {
                RecycleError::Api(api) if api.is_transient() => {
                    RecycleError::Interrupted.for_member(&member, &host)
                }
                other => RecycleError::WorkItem {
                    member,
                    host,
                    source: Box::new(other),
                },
            },
            other => other,
        }
    }

    /// Capture the baseline and report what a run would do.
    pub async fn plan(&mut self) -> RecycleResult<RecycleSummary> {
        let group = self.snapshot().await?;
        let total = self.items.len();
        for (i, item) in self.items.iter().enumerate() {
            if item.member.status != DrainStatus::Active {
                info!(
                    item = i + 1,
                    total,
                    member = %item.member.instance_id,
                    host = %item.member.host_id,
                    running_tasks = item.member.running_tasks,
                    "would finish draining and terminate"
                );
                continue;
            }
            info!(
                item = i + 1,
                total,
                member = %item.member.instance_id,
                host = %item.member.host_id,
                running_tasks = item.member.running_tasks,
                "would bump desired to {}, drain, and terminate",
                group.desired + 1
            );
        }
        Ok(self.summary())
    }

    /// Replace every baseline member. In dry-run mode this is [`plan`].
    ///
    /// On failure the work items stay available through [`summary`].
    ///
    /// [`plan`]: Self::plan
    /// [`summary`]: Self::summary
    pub async fn run(&mut self) -> RecycleResult<RecycleSummary> {
        let result = self.execute().await;
        result.map_err(|e| self.interrupted_or(e))
    }

    async fn execute(&mut self) -> RecycleResult<RecycleSummary> {
        if self.config.dry_run {
            return self.plan().await;
        }

        let baseline = self.snapshot().await?;
        if self.items.is_empty() {
            info!(cluster = %self.config.cluster, "no members to recycle");
            return Ok(self.summary());
        }

        self.capacity.suspend_processes().await?;
        let outcome = self.recycle_all().await;
        let resumed = self.capacity.resume_processes().await;

        if let Err(e) = outcome {
            if let Err(resume_err) = resumed {
                error!(error = %resume_err, "failed to resume scaling processes");
            }
            return Err(e);
        }
        resumed?;

        match self.config.restore {
            RestorePolicy::Baseline => {
                self.capacity.restore_desired(&baseline).await?;
                self.restored = true;
            }
            RestorePolicy::Leave => {
                info!("leaving desired capacity to the group's scaling policy");
                self.capacity.restore_max_size(&baseline).await?;
            }
        }

        info!(
            cluster = %self.config.cluster,
            replaced = self.items.len(),
            "recycle complete"
        );
        Ok(self.summary())
    }

    async fn recycle_all(&mut self) -> RecycleResult<()> {
        let mut known: BTreeSet<String> = self
            .items
            .iter()
            .map(|i| i.member.instance_id.clone())
            .collect();

        for index in 0..self.items.len() {
            if let Err(e) = self.recycle_one(index, &mut known).await {
                let item = &mut self.items[index];
                item.state = WorkItemState::Failed;
                item.failure = Some(e.to_string());
                error!(
                    member = %item.member.instance_id,
                    host = %item.member.host_id,
                    error = %e,
                    "recycle halted"
                );
                return Err(e.for_member(&item.member.instance_id, &item.member.host_id));
            }
        }
        Ok(())
    }

    async fn recycle_one(&mut self, index: usize, known: &mut BTreeSet<String>) -> RecycleResult<()> {
        self.poller.check_interrupted()?;
        let member = self.items[index].member.clone();
        info!(
            item = index + 1,
            total = self.items.len(),
            member = %member.instance_id,
            host = %member.host_id,
            "recycling member"
        );

        if member.status == DrainStatus::Active {
            self.items[index].state = WorkItemState::CapacityRequested;
            let target = self.capacity.increase_desired(1).await?;
            self.capacity
                .await_capacity_reached(target, self.config.capacity_policy())
                .await?;

            let joined = self
                .inventory
                .await_new_member(known, self.config.join_policy())
                .await?;
            known.extend(joined.iter().map(|m| m.instance_id.clone()));
            self.items[index].replacement = joined.first().map(|m| m.instance_id.clone());
            self.poller.pause(self.config.settle_delay()).await?;
        } else {
            info!(
                member = %member.instance_id,
                status = %member.status,
                "member already draining; its replacement is in service"
            );
        }

        self.poller.check_interrupted()?;
        self.items[index].state = WorkItemState::Draining;
        self.drain.begin_drain(&member).await?;
        let confirmation = self
            .drain
            .await_drained(&member, self.config.drain_policy())
            .await?;
        self.poller.pause(self.config.settle_delay()).await?;

        self.drain
            .terminate_underlying_instance(&member, confirmation)
            .await?;
        let item = &mut self.items[index];
        item.forced = confirmation.is_forced();
        item.state = WorkItemState::Terminated;
        Ok(())
    }
}
