//! Error types for the label watcher.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::workflow::Phase;

/// Errors returned by an issue tracker client
#[derive(Debug, Error)]
pub enum TrackerError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request URL could not be built
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// Tracker returned an unexpected status
    #[error("Tracker API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limit exhausted
    #[error("Rate limit exceeded, reset in {reset_in:?}")]
    RateLimitExceeded { reset_in: Duration },

    /// Token missing, expired or rejected
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Token lacks the permission for the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Issue or label does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Labels changed between read and write
    #[error("Concurrent modification detected on issue #{0}")]
    ConcurrentModification(u64),

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    /// Classify the error into a bounded reason tag
    #[must_use]
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Http(err) if err.is_timeout() => FailureReason::Timeout,
            Self::Http(err) if err.is_decode() => FailureReason::InvalidResponse,
            Self::Http(_) | Self::InvalidUrl(_) => FailureReason::NetworkError,
            Self::Api { status: 401, .. } | Self::AuthenticationFailed => {
                FailureReason::AuthenticationFailed
            }
            Self::Api { status: 403, .. } | Self::PermissionDenied(_) => {
                FailureReason::PermissionDenied
            }
            Self::Api { status: 404, .. } | Self::NotFound(_) => FailureReason::NotFound,
            Self::Api { status: 408, .. } | Self::Timeout(_) => FailureReason::Timeout,
            Self::Api { status: 412 | 409, .. } | Self::ConcurrentModification(_) => {
                FailureReason::Conflict
            }
            Self::Api { status: 429, .. } | Self::RateLimitExceeded { .. } => {
                FailureReason::RateLimited
            }
            Self::Api { .. } => FailureReason::ApiError,
            Self::Serialization(_) => FailureReason::InvalidResponse,
        }
    }
}

/// Bounded vocabulary of transition failure tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    ApiError,
    PermissionDenied,
    AuthenticationFailed,
    NotFound,
    RateLimited,
    Timeout,
    NetworkError,
    Conflict,
    InvalidResponse,
    /// The tracker answered but refused to apply the labels
    TransitionRejected,
}

impl FailureReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ApiError => "api_error",
            Self::PermissionDenied => "permission_denied",
            Self::AuthenticationFailed => "authentication_failed",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::Conflict => "conflict",
            Self::InvalidResponse => "invalid_response",
            Self::TransitionRejected => "transition_rejected",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by phase actions
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action '{action}' cannot run: {reason}")]
    NotExecutable { action: String, reason: String },

    #[error("Action '{action}' failed: {source}")]
    Tracker {
        action: String,
        #[source]
        source: TrackerError,
    },
}

/// Errors surfaced by the decision layer
#[derive(Debug, Error)]
pub enum DecisionError {
    /// The label transition failed; the failure is already recorded
    #[error("Transition {transition} failed for issue #{issue_number} ({reason}): {source}")]
    Transition {
        issue_number: u64,
        phase: Phase,
        transition: String,
        reason: FailureReason,
        #[source]
        source: TrackerError,
        /// Outcome of the phase action that ran after the failure
        action: Option<Result<(), ActionError>>,
    },

    /// The tracker answered without applying the transition
    #[error("Transition {transition} rejected for issue #{issue_number}")]
    Rejected {
        issue_number: u64,
        phase: Phase,
        transition: String,
        /// Outcome of the phase action that ran after the rejection
        action: Option<Result<(), ActionError>>,
    },
}

impl DecisionError {
    /// Reason tag recorded for this failure
    #[must_use]
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Transition { reason, .. } => *reason,
            Self::Rejected { .. } => FailureReason::TransitionRejected,
        }
    }

    /// Phase action outcome; `None` when no action ran
    #[must_use]
    pub fn action(&self) -> Option<&Result<(), ActionError>> {
        match self {
            Self::Transition { action, .. } | Self::Rejected { action, .. } => action.as_ref(),
        }
    }

    /// Attach the phase action outcome
    #[must_use]
    pub(crate) fn with_action(mut self, outcome: Option<Result<(), ActionError>>) -> Self {
        match &mut self {
            Self::Transition { action, .. } | Self::Rejected { action, .. } => *action = outcome,
        }
        self
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_status_classification() {
        let cases = [
            (401, FailureReason::AuthenticationFailed),
            (403, FailureReason::PermissionDenied),
            (404, FailureReason::NotFound),
            (409, FailureReason::Conflict),
            (412, FailureReason::Conflict),
            (429, FailureReason::RateLimited),
            (500, FailureReason::ApiError),
            (422, FailureReason::ApiError),
        ];
        for (status, expected) in cases {
            let err = TrackerError::Api {
                status,
                message: "boom".to_string(),
            };
            assert_eq!(err.failure_reason(), expected, "status {status}");
        }
    }

    #[test]
    fn test_variant_classification() {
        assert_eq!(
            TrackerError::RateLimitExceeded {
                reset_in: Duration::from_secs(5)
            }
            .failure_reason()
            .as_str(),
            "rate_limited"
        );
        assert_eq!(
            TrackerError::Timeout("list".to_string()).failure_reason(),
            FailureReason::Timeout
        );
        assert_eq!(
            TrackerError::ConcurrentModification(3).failure_reason(),
            FailureReason::Conflict
        );
        assert_eq!(
            TrackerError::AuthenticationFailed.failure_reason().to_string(),
            "authentication_failed"
        );
        assert_eq!(
            TrackerError::InvalidUrl("no base".to_string()).failure_reason(),
            FailureReason::NetworkError
        );
    }

    #[test]
    fn test_reason_tags_never_contain_raw_messages() {
        let err = TrackerError::Api {
            status: 502,
            message: "upstream exploded at 10:42:07".to_string(),
        };
        assert_eq!(err.failure_reason().as_str(), "api_error");
    }
}
