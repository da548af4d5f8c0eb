//! fleetcycle-sim — a deterministic stand-in for the cloud.
//!
//! `SimCluster` implements both [`OrchestratorApi`] and
//! [`CapacityGroupApi`] over one shared in-memory world. `SimClock`
//! advances that world one tick per sleep, so a full recycle runs in
//! microseconds with every intermediate state recorded.
//!
//! # World model
//!
//! ```text
//! tick:
//!   in-service host without member; join_ticks later -> registers ACTIVE
//!   pending host ages; after launch_ticks     -> InService
//!   draining member (not stuck)               -> moves drain_per_tick tasks
//!                                                to the least loaded ACTIVE member
//!   live hosts < min(desired, max)            -> launch Pending hosts
//!   live hosts > min(desired, max)            -> scale in newest host
//! ```
//!
//! [`OrchestratorApi`]: fleetcycle_core::OrchestratorApi
//! [`CapacityGroupApi`]: fleetcycle_core::CapacityGroupApi

pub mod clock;
pub mod cluster;

pub use clock::SimClock;
pub use cluster::{SimCluster, SimClusterBuilder, Termination};
