//! fleetcycle-orchestrator — rolling replacement of cluster hosts.
//!
//! Replaces every member present at run start (the baseline) one at a
//! time, never letting in-service capacity drop below the baseline.
//!
//! # Algorithm
//!
//! ```text
//! snapshot baseline members + group; members > ceiling -> ConfigError
//! suspend disruptive group processes
//! for member in baseline (already-draining members first, then id order):
//!     if ACTIVE:
//!         desired += 1; wait in_service >= desired
//!         wait for a member not seen before to register ACTIVE
//!     drain member; wait running_tasks == 0   (timeout -> STUCK, or force)
//!     terminate member's host via the group, decrementing desired
//! resume processes; restore desired per policy; put back a raised max
//! ```
//!
//! Any failure halts the loop with at most one member mid-drain and
//! capacity at or above baseline. Re-running takes a fresh baseline. A
//! member left draining already has its replacement in service, so it is
//! terminated without a new bump and is left out of the restore target.
//!
//! # Components
//!
//! - **`orchestrator`** — `RecycleOrchestrator`, the control loop and dry-run planner
//! - **`summary`** — `RecycleSummary`, the per-run report

pub mod orchestrator;
pub mod summary;

pub use orchestrator::RecycleOrchestrator;
pub use summary::RecycleSummary;
