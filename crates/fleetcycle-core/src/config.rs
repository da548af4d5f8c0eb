//! Recycle configuration.
//!
//! Loaded from an optional TOML file and then overridden by CLI flags.
//! Every field has a default except the cluster and capacity-group
//! names, which `validate()` insists on.
//!
//! ```toml
//! cluster = "prod-ecs"
//! capacity_group = "prod-ecs-asg"
//! poll_interval_secs = 15
//! drain_timeout_secs = 900
//! restore = "baseline"
//!
//! [retry]
//! max_attempts = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::poll::PollPolicy;

/// Capacity-group processes suspended while the recycle runs.
pub const DEFAULT_SUSPEND_PROCESSES: &[&str] = &[
    "ReplaceUnhealthy",
    "AlarmNotification",
    "ScheduledActions",
    "AZRebalance",
];

/// What to do with desired capacity once every work item is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Set desired (and max, if raised) back to the baseline values.
    #[default]
    Baseline,
    /// Leave capacity as-is for the group's own scale-in policy.
    Leave,
}

/// Backoff for throttled API calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 20_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecycleConfig {
    /// Orchestrator cluster name.
    pub cluster: String,
    /// Autoscaling group backing the cluster.
    pub capacity_group: String,
    pub region: Option<String>,
    pub poll_interval_secs: u64,
    /// How long the group may take to bring a new instance in service.
    pub capacity_timeout_secs: u64,
    /// How long a new instance may take to register with the orchestrator.
    pub join_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    /// Pause after a member joins and after it drains.
    pub settle_secs: u64,
    pub member_ceiling: usize,
    pub dry_run: bool,
    /// Terminate a member that is still running tasks after the drain
    /// timeout. Tasks on it are lost.
    pub force_after_timeout: bool,
    pub restore: RestorePolicy,
    /// Raise the group's max size when the temporary bump would exceed it.
    pub raise_max_size: bool,
    pub suspend_processes: Vec<String>,
    pub retry: RetryConfig,
}

impl Default for RecycleConfig {
    fn default() -> Self {
        Self {
            cluster: String::new(),
            capacity_group: String::new(),
            region: None,
            poll_interval_secs: 15,
            capacity_timeout_secs: 600,
            join_timeout_secs: 600,
            drain_timeout_secs: 900,
            settle_secs: 15,
            member_ceiling: 100,
            dry_run: false,
            force_after_timeout: false,
            restore: RestorePolicy::Baseline,
            raise_max_size: false,
            suspend_processes: DEFAULT_SUSPEND_PROCESSES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            retry: RetryConfig::default(),
        }
    }
}

impl RecycleConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::File { reason, .. } => ConfigError::File {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::File {
            path: String::new(),
            reason: e.to_string(),
        })
    }

    /// Check parameters before anything touches the cluster.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.trim().is_empty() {
            return Err(ConfigError::Missing("cluster"));
        }
        if self.capacity_group.trim().is_empty() {
            return Err(ConfigError::Missing("capacity_group"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        for (field, timeout) in [
            ("capacity_timeout_secs", self.capacity_timeout_secs),
            ("join_timeout_secs", self.join_timeout_secs),
            ("drain_timeout_secs", self.drain_timeout_secs),
        ] {
            if timeout < self.poll_interval_secs {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!(
                        "{timeout}s is shorter than the poll interval ({}s)",
                        self.poll_interval_secs
                    ),
                });
            }
        }
        if self.member_ceiling == 0 {
            return Err(ConfigError::Invalid {
                field: "member_ceiling",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn capacity_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval(), Duration::from_secs(self.capacity_timeout_secs))
    }

    pub fn join_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval(), Duration::from_secs(self.join_timeout_secs))
    }

    pub fn drain_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval(), Duration::from_secs(self.drain_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RecycleConfig {
        RecycleConfig {
            cluster: "prod".to_string(),
            capacity_group: "prod-asg".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_follow_recycle_procedure() {
        let cfg = RecycleConfig::default();
        assert_eq!(cfg.poll_interval_secs, 15);
        assert_eq!(cfg.member_ceiling, 100);
        assert_eq!(cfg.restore, RestorePolicy::Baseline);
        assert!(!cfg.force_after_timeout);
        assert!(!cfg.raise_max_size);
        assert_eq!(cfg.suspend_processes.len(), 4);
        assert!(cfg.suspend_processes.iter().any(|p| p == "AZRebalance"));
    }

    #[test]
    fn validate_requires_names() {
        let cfg = RecycleConfig::default();
        assert_eq!(cfg.validate(), Err(ConfigError::Missing("cluster")));

        let cfg = RecycleConfig {
            cluster: "prod".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Missing("capacity_group")));

        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let cfg = RecycleConfig {
            poll_interval_secs: 0,
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_timeout_below_interval() {
        let cfg = RecycleConfig {
            poll_interval_secs: 30,
            drain_timeout_secs: 10,
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "drain_timeout_secs",
                ..
            })
        ));
    }

    #[test]
    fn parses_toml_with_partial_fields() {
        let cfg = RecycleConfig::from_toml_str(
            r#"
cluster = "prod"
capacity_group = "prod-asg"
drain_timeout_secs = 1200
restore = "leave"
suspend_processes = ["AZRebalance"]

[retry]
max_attempts = 8
"#,
        )
        .unwrap();

        assert_eq!(cfg.cluster, "prod");
        assert_eq!(cfg.drain_timeout_secs, 1200);
        assert_eq!(cfg.poll_interval_secs, 15);
        assert_eq!(cfg.restore, RestorePolicy::Leave);
        assert_eq!(cfg.suspend_processes, vec!["AZRebalance".to_string()]);
        assert_eq!(cfg.retry.max_attempts, 8);
        assert_eq!(cfg.retry.base_delay_ms, 500);
    }

    #[test]
    fn rejects_unknown_restore_policy() {
        let err = RecycleConfig::from_toml_str("restore = \"sometimes\"").unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetcycle.toml");
        std::fs::write(&path, "cluster = \"prod\"\ncapacity_group = \"asg\"\n").unwrap();

        let cfg = RecycleConfig::from_file(&path).unwrap();
        assert_eq!(cfg.capacity_group, "asg");

        let missing = dir.path().join("missing.toml");
        match RecycleConfig::from_file(&missing) {
            Err(ConfigError::File { path, .. }) => assert!(path.ends_with("missing.toml")),
            other => panic!("expected file error, got {other:?}"),
        }
    }

    #[test]
    fn policies_use_configured_values() {
        let cfg = RecycleConfig {
            poll_interval_secs: 5,
            drain_timeout_secs: 60,
            ..valid()
        };
        let policy = cfg.drain_policy();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.timeout, Duration::from_secs(60));
    }
}
