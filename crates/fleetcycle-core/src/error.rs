//! Error taxonomy for the recycler.
//!
//! Three categories reach the operator, each with its own exit code:
//! configuration problems (nothing was touched), API failures (the run
//! halted at a safe point), and timeouts (something outside the tool
//! needs attention).

use std::time::Duration;

use thiserror::Error;

pub type RecycleResult<T> = Result<T, RecycleError>;

/// Invalid or missing parameters. Raised before any mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("cluster has {members} members, above the ceiling of {ceiling}")]
    ClusterTooLarge { members: usize, ceiling: usize },

    #[error("failed to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Coarse classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Network failure, timeout, or malformed response.
    Transport,
    /// Credentials missing, expired, or not authorized.
    Auth,
    /// Request rate exceeded. Retried with backoff.
    Throttled,
    /// The named resource does not exist.
    NotFound,
    /// The service refused the request.
    Rejected,
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Auth => "auth",
            Self::Throttled => "throttled",
            Self::NotFound => "not found",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A failed call against the orchestrator or capacity-group API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed ({kind}): {message}")]
pub struct ApiError {
    pub operation: String,
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(operation: impl Into<String>, kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether the call is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.kind == ApiErrorKind::Throttled
    }
}

/// A bounded wait ran out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeoutError {
    #[error(
        "capacity group did not reach {target} in-service instances after {elapsed:?} \
         (in service: {in_service}, desired: {desired}, max: {max_size})"
    )]
    CapacityNotReached {
        target: u32,
        in_service: u32,
        desired: u32,
        max_size: u32,
        elapsed: Duration,
    },

    #[error("no new member joined the cluster after {elapsed:?} (members: {members})")]
    MemberNotJoined { members: usize, elapsed: Duration },

    #[error("member {member} is stuck draining with {running_tasks} running tasks after {elapsed:?}")]
    DrainStuck {
        member: String,
        running_tasks: u32,
        elapsed: Duration,
    },
}

/// Operator-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Api,
    Timeout,
    Interrupted,
}

impl ErrorCategory {
    /// Process exit code for this category.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Config => 2,
            Self::Api => 3,
            Self::Timeout => 4,
            Self::Interrupted => 130,
        }
    }
}

/// Umbrella error returned by the recycle components.
#[derive(Debug, Error)]
pub enum RecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("refusing to terminate {member}: {running_tasks} tasks still running")]
    TasksRunning { member: String, running_tasks: u32 },

    #[error("interrupted")]
    Interrupted,

    #[error("work item {member} (host {host}): {source}")]
    WorkItem {
        member: String,
        host: String,
        #[source]
        source: Box<RecycleError>,
    },
}

impl RecycleError {
    /// Attach the work item in progress to an error.
    pub fn for_member(self, member: &str, host: &str) -> Self {
        match self {
            Self::WorkItem { .. } => self,
            other => Self::WorkItem {
                member: member.to_string(),
                host: host.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::Api(_) => ErrorCategory::Api,
            Self::Timeout(_) => ErrorCategory::Timeout,
            // Member regained tasks after draining.
            Self::TasksRunning { .. } => ErrorCategory::Timeout,
            Self::Interrupted => ErrorCategory::Interrupted,
            Self::WorkItem { source, .. } => source.category(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// The member that was being processed, if any.
    pub fn member(&self) -> Option<&str> {
        match self {
            Self::WorkItem { member, .. } => Some(member),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            ErrorCategory::Config.exit_code(),
            ErrorCategory::Api.exit_code(),
            ErrorCategory::Timeout.exit_code(),
            ErrorCategory::Interrupted.exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn work_item_context_keeps_category() {
        let err = RecycleError::from(TimeoutError::DrainStuck {
            member: "arn:ci/a".to_string(),
            running_tasks: 2,
            elapsed: Duration::from_secs(60),
        })
        .for_member("arn:ci/a", "i-a");

        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(err.exit_code(), 4);
        assert_eq!(err.member(), Some("arn:ci/a"));
        assert!(err.to_string().contains("i-a"));
    }

    #[test]
    fn work_item_context_is_not_nested() {
        let err = RecycleError::from(ApiError::new("x", ApiErrorKind::Auth, "denied"))
            .for_member("a", "i-a")
            .for_member("b", "i-b");
        assert_eq!(err.member(), Some("a"));
        assert_eq!(err.category(), ErrorCategory::Api);
    }

    #[test]
    fn only_throttling_is_transient() {
        assert!(ApiError::new("op", ApiErrorKind::Throttled, "slow down").is_transient());
        assert!(!ApiError::new("op", ApiErrorKind::Transport, "reset").is_transient());
        assert!(!ApiError::new("op", ApiErrorKind::NotFound, "gone").is_transient());
    }

    #[test]
    fn config_error_message() {
        let err = ConfigError::ClusterTooLarge {
            members: 101,
            ceiling: 100,
        };
        assert_eq!(
            err.to_string(),
            "cluster has 101 members, above the ceiling of 100"
        );
    }
}
