//! Virtual clock that drives the simulated world.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleetcycle_core::Clock;

use crate::cluster::SimCluster;

/// Each `sleep` advances virtual time by the requested duration and
/// ticks the world once.
pub struct SimClock {
    sim: SimCluster,
    now_ms: AtomicU64,
}

impl SimClock {
    pub fn new(sim: SimCluster) -> Self {
        Self {
            sim,
            now_ms: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Clock for SimClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        self.sim.tick();
        tokio::task::yield_now().await;
    }
}
