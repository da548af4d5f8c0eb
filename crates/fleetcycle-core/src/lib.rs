//! fleetcycle-core — shared types for the fleetcycle instance recycler.
//!
//! Everything the recycle components agree on lives here:
//!
//! - **`types`** — cluster members, the capacity group, work items
//! - **`error`** — `ConfigError`, `ApiError`, `TimeoutError`, `RecycleError`
//! - **`config`** — `RecycleConfig` (TOML file + CLI overrides)
//! - **`api`** — traits for the orchestrator and capacity-group APIs
//! - **`poll`** — injectable clock, bounded polling, transient retry

pub mod api;
pub mod config;
pub mod error;
pub mod poll;
pub mod types;

pub use api::{CapacityGroupApi, OrchestratorApi};
pub use config::{RecycleConfig, RestorePolicy, RetryConfig, DEFAULT_SUSPEND_PROCESSES};
pub use error::{
    ApiError, ApiErrorKind, ConfigError, ErrorCategory, RecycleError, RecycleResult, TimeoutError,
};
pub use poll::{Clock, PollError, PollPolicy, Poller, Check, ShutdownSignal, TokioClock};
pub use types::{
    CapacityGroup, ClusterMember, DrainStatus, GroupInstance, LifecycleState, RecycleWorkItem,
    WorkItemState,
};
