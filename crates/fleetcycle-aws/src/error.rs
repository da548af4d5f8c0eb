//! SDK error classification.

use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use fleetcycle_core::{ApiError, ApiErrorKind};

/// Classify an AWS error code.
pub fn classify(code: Option<&str>) -> ApiErrorKind {
    match code {
        Some(
            "Throttling"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "TooManyRequestsException"
            | "ScalingActivityInProgress",
        ) => ApiErrorKind::Throttled,
        Some(
            "AccessDenied"
            | "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidClientTokenId"
            | "ExpiredToken"
            | "ExpiredTokenException"
            | "UnauthorizedOperation",
        ) => ApiErrorKind::Auth,
        Some("ClusterNotFoundException" | "ResourceNotFoundException") => ApiErrorKind::NotFound,
        Some(_) => ApiErrorKind::Rejected,
        None => ApiErrorKind::Transport,
    }
}

/// Convert any SDK error into an [`ApiError`] for `operation`.
pub fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let kind = match &err {
        SdkError::ServiceError(service) => classify(service.err().code()),
        SdkError::ConstructionFailure(_) => ApiErrorKind::Rejected,
        _ => ApiErrorKind::Transport,
    };
    ApiError::new(operation, kind, DisplayErrorContext(&err).to_string())
}

/// A per-item failure reported inside an otherwise successful response.
pub fn item_failure(operation: &str, arn: Option<&str>, reason: Option<&str>) -> ApiError {
    let reason = reason.unwrap_or("unknown");
    let kind = if reason == "MISSING" {
        ApiErrorKind::NotFound
    } else {
        ApiErrorKind::Rejected
    };
    ApiError::new(
        operation,
        kind,
        format!("{}: {reason}", arn.unwrap_or("<unknown>")),
    )
}
