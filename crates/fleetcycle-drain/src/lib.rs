//! Drain coordinator — takes one member from ACTIVE to terminated.
//!
//! ```text
//! ACTIVE ──begin_drain──▶ DRAINING ──await_drained──▶ DRAINED ──▶ terminate
//!                                       │
//!                                       └─ timeout ──▶ STUCK (halt)
//!                                                └─ force ──▶ terminate anyway
//! ```
//!
//! The orchestrator moves the member's tasks elsewhere on its own; this
//! crate only flips the drain flag, watches the running-task count, and
//! issues the termination. Termination takes a [`DrainConfirmation`],
//! which can only be obtained from [`DrainCoordinator::await_drained`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use fleetcycle_core::*;

/// Evidence that a member may be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfirmation {
    forced: bool,
}

impl DrainConfirmation {
    /// The drain timed out and force-after-timeout was enabled.
    pub fn is_forced(&self) -> bool {
        self.forced
    }
}

pub struct DrainCoordinator {
    orchestrator: Arc<dyn OrchestratorApi>,
    capacity: Arc<dyn CapacityGroupApi>,
    poller: Poller,
    force_after_timeout: bool,
}

impl DrainCoordinator {
    pub fn new(
        orchestrator: Arc<dyn OrchestratorApi>,
        capacity: Arc<dyn CapacityGroupApi>,
        poller: Poller,
    ) -> Self {
        Self {
            orchestrator,
            capacity,
            poller,
            force_after_timeout: false,
        }
    }

    /// Terminate members that are still running tasks when the drain
    /// timeout elapses.
    pub fn with_force_after_timeout(mut self, force: bool) -> Self {
        self.force_after_timeout = force;
        self
    }

    async fn describe(&self, instance_id: &str) -> Result<Option<ClusterMember>, ApiError> {
        self.poller
            .retry("describe_member", || self.orchestrator.describe_member(instance_id))
            .await
    }

    /// Mark the member as draining. Does nothing if it already is.
    pub async fn begin_drain(&self, member: &ClusterMember) -> RecycleResult<()> {
        let current = self.describe(&member.instance_id).await?.ok_or_else(|| {
            ApiError::new(
                "describe_member",
                ApiErrorKind::NotFound,
                format!("container instance {} is no longer registered", member.instance_id),
            )
        })?;

        if current.status != DrainStatus::Active {
            debug!(member = %member.instance_id, status = %current.status, "already draining");
            return Ok(());
        }

        self.poller
            .retry("set_draining", || {
                self.orchestrator.set_draining(&member.instance_id)
            })
            .await?;

        info!(
            member = %member.instance_id,
            host = %member.host_id,
            running_tasks = current.running_tasks,
            "draining member"
        );
        Ok(())
    }

    /// Wait for the member's running-task count to reach zero.
    pub async fn await_drained(
        &self,
        member: &ClusterMember,
        policy: PollPolicy,
    ) -> RecycleResult<DrainConfirmation> {
        let instance_id = member.instance_id.as_str();
        let result = self
            .poller
            .until(policy, move || async move {
                match self.describe(instance_id).await? {
                    None => {
                        debug!(member = %instance_id, "member deregistered while draining");
                        Ok(Check::Ready(()))
                    }
                    Some(m) if m.is_drained() => Ok(Check::Ready(())),
                    Some(m) => {
                        debug!(
                            member = %instance_id,
                            running_tasks = m.running_tasks,
                            "waiting for tasks to migrate"
                        );
                        Ok(Check::Waiting(m.running_tasks))
                    }
                }
            })
            .await;

        match result {
            Ok(()) => {
                info!(member = %instance_id, "member drained");
                Ok(DrainConfirmation { forced: false })
            }
            Err(PollError::TimedOut {
                last: running_tasks,
                elapsed,
            }) => {
                if self.force_after_timeout {
                    warn!(
                        member = %instance_id,
                        running_tasks,
                        elapsed_secs = elapsed.as_secs(),
                        "drain timed out; forcing termination"
                    );
                    return Ok(DrainConfirmation { forced: true });
                }
                warn!(
                    member = %instance_id,
                    running_tasks,
                    elapsed_secs = elapsed.as_secs(),
                    "member stuck draining"
                );
                Err(TimeoutError::DrainStuck {
                    member: instance_id.to_string(),
                    running_tasks,
                    elapsed,
                }
                .into())
            }
            Err(PollError::Api(e)) => Err(e.into()),
            Err(PollError::Interrupted) => Err(RecycleError::Interrupted),
        }
    }

    /// Terminate the compute instance behind `member` through the
    /// capacity group, decrementing desired capacity.
    pub async fn terminate_underlying_instance(
        &self,
        member: &ClusterMember,
        confirmation: DrainConfirmation,
    ) -> RecycleResult<()> {
        if !confirmation.forced {
            if let Some(current) = self.describe(&member.instance_id).await? {
                if current.running_tasks > 0 {
                    return Err(RecycleError::TasksRunning {
                        member: member.instance_id.clone(),
                        running_tasks: current.running_tasks,
                    });
                }
            }
        }

        self.poller
            .retry("terminate_instance", || {
                self.capacity.terminate_instance(&member.host_id, true)
            })
            .await?;

        info!(
            member = %member.instance_id,
            host = %member.host_id,
            forced = confirmation.forced,
            "terminated instance"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fleetcycle_sim::{SimClock, SimCluster};

    fn coordinator(sim: &SimCluster) -> DrainCoordinator {
        let poller = Poller::new(Arc::new(SimClock::new(sim.clone())));
        DrainCoordinator::new(Arc::new(sim.clone()), Arc::new(sim.clone()), poller)
    }

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(15), Duration::from_secs(120))
    }

    fn first_member(sim: &SimCluster) -> ClusterMember {
        sim.member(&sim.member_ids()[0]).unwrap()
    }

    #[tokio::test]
    async fn begin_drain_is_idempotent() {
        let sim = SimCluster::builder().members(2).build();
        let drain = coordinator(&sim);
        let member = first_member(&sim);

        drain.begin_drain(&member).await.unwrap();
        drain.begin_drain(&member).await.unwrap();

        assert_eq!(sim.drain_transitions(), vec![member.instance_id.clone()]);
        assert_eq!(sim.mutations(), 1);
    }

    #[tokio::test]
    async fn begin_drain_on_missing_member_fails() {
        let sim = SimCluster::builder().members(2).build();
        let drain = coordinator(&sim);
        let mut member = first_member(&sim);
        member.instance_id = "ci-gone".to_string();

        let err = drain.begin_drain(&member).await.unwrap_err();
        assert!(matches!(err, RecycleError::Api(e) if e.kind == ApiErrorKind::NotFound));
    }

    #[tokio::test]
    async fn drains_and_terminates() {
        let sim = SimCluster::builder().members(3).tasks_per_member(4).build();
        let drain = coordinator(&sim);
        let member = first_member(&sim);

        drain.begin_drain(&member).await.unwrap();
        let confirmation = drain.await_drained(&member, policy()).await.unwrap();
        assert!(!confirmation.is_forced());

        drain
            .terminate_underlying_instance(&member, confirmation)
            .await
            .unwrap();

        let terms = sim.terminations();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].host_id, member.host_id);
        assert_eq!(terms[0].running_tasks, 0);
        assert!(terms[0].decrement_desired);
        assert_eq!(sim.total_tasks(), 12);
    }

    #[tokio::test]
    async fn stuck_member_times_out_without_force() {
        let sim = SimCluster::builder().members(2).build();
        let drain = coordinator(&sim);
        let member = first_member(&sim);
        sim.set_stuck(&member.instance_id);

        drain.begin_drain(&member).await.unwrap();
        let err = drain.await_drained(&member, policy()).await.unwrap_err();

        assert!(matches!(
            err,
            RecycleError::Timeout(TimeoutError::DrainStuck { running_tasks: 4, .. })
        ));
        assert!(sim.terminations().is_empty());
    }

    #[tokio::test]
    async fn stuck_member_is_forced_when_enabled() {
        let sim = SimCluster::builder().members(2).build();
        let drain = coordinator(&sim).with_force_after_timeout(true);
        let member = first_member(&sim);
        sim.set_stuck(&member.instance_id);

        drain.begin_drain(&member).await.unwrap();
        let confirmation = drain.await_drained(&member, policy()).await.unwrap();
        assert!(confirmation.is_forced());

        drain
            .terminate_underlying_instance(&member, confirmation)
            .await
            .unwrap();
        assert_eq!(sim.terminations()[0].running_tasks, 4);
    }

    #[tokio::test]
    async fn refuses_termination_when_tasks_return() {
        let sim = SimCluster::builder().members(2).build();
        let drain = coordinator(&sim);
        let member = first_member(&sim);

        drain.begin_drain(&member).await.unwrap();
        let confirmation = drain.await_drained(&member, policy()).await.unwrap();
        sim.set_running_tasks(&member.instance_id, 1);

        let err = drain
            .terminate_underlying_instance(&member, confirmation)
            .await
            .unwrap_err();
        assert!(matches!(err, RecycleError::TasksRunning { running_tasks: 1, .. }));
        assert!(sim.terminations().is_empty());
    }

    #[tokio::test]
    async fn idle_member_drains_immediately() {
        let sim = SimCluster::builder().members(2).tasks_per_member(0).build();
        let drain = coordinator(&sim);
        let member = first_member(&sim);

        drain.begin_drain(&member).await.unwrap();
        drain.await_drained(&member, policy()).await.unwrap();
        assert_eq!(sim.ticks(), 0);
    }
}
