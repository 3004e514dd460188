//! Error types for A2A protocol operations and dispatching

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-visible failure classification
///
/// Every failure that reaches a caller is tagged with exactly one of these kinds,
/// whether it originated in discovery, routing, the transport or the remote agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Network or transport failure after the retry budget was exhausted
    Unreachable,

    /// The remote agent declined the task
    Rejected,

    /// The discovery response was not a valid agent card
    InvalidCard,

    /// The task id is unknown or stale
    TaskNotFound,

    /// No reachable agent can handle the query
    NoCapableAgent,

    /// The task exceeded its wall-clock budget
    Timeout,

    /// The caller cancelled the task
    #[serde(alias = "canceled")]
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::Rejected => "rejected",
            ErrorKind::InvalidCard => "invalid-card",
            ErrorKind::TaskNotFound => "task-not-found",
            ErrorKind::NoCapableAgent => "no-capable-agent",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Main error type for A2A protocol operations
#[derive(Debug, Error)]
pub enum A2AError {
    /// Transient transport-level error (connection reset, 5xx, dropped stream).
    /// Retried internally; surfaces as [`A2AError::Unreachable`] once the budget is spent.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Agent could not be reached after all retry attempts
    #[error("Agent unreachable: {0}")]
    Unreachable(String),

    /// Agent declined to create the task
    #[error("Task rejected: {0}")]
    Rejected(String),

    /// Agent card could not be fetched or parsed
    #[error("Invalid agent card: {0}")]
    InvalidCard(String),

    /// Task not found error
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Router found no matching or reachable agent
    #[error("No capable agent: {0}")]
    NoCapableAgent(String),

    /// Task exceeded its wall-clock budget
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    /// Task was cancelled by the caller
    #[error("Task cancelled")]
    Cancelled,

    /// Agent does not offer an event stream for its tasks; status polling still works
    #[error("Event stream unavailable: {0}")]
    StreamingUnavailable(String),

    /// Protocol-level error (malformed frame, unexpected response shape)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Validation error (invalid request or response)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication or authorization error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid dispatcher configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The injected decision function failed
    #[error("Decision function error: {0}")]
    Decision(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl A2AError {
    /// Whether the error is worth retrying at the transport level
    pub fn is_transient(&self) -> bool {
        matches!(self, A2AError::Transport(_))
    }

    /// Classify the error for the caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            A2AError::Transport(_)
            | A2AError::Unreachable(_)
            | A2AError::Protocol(_)
            | A2AError::Serialization(_) => ErrorKind::Unreachable,
            A2AError::Rejected(_)
            | A2AError::StreamingUnavailable(_)
            | A2AError::Validation(_)
            | A2AError::Auth(_) => ErrorKind::Rejected,
            A2AError::InvalidCard(_) => ErrorKind::InvalidCard,
            A2AError::TaskNotFound { .. } => ErrorKind::TaskNotFound,
            A2AError::NoCapableAgent(_) | A2AError::Config(_) | A2AError::Decision(_) => {
                ErrorKind::NoCapableAgent
            }
            A2AError::Timeout(_) => ErrorKind::Timeout,
            A2AError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Promote a transient error to [`A2AError::Unreachable`] once retries are exhausted
    pub fn into_unreachable(self) -> Self {
        match self {
            A2AError::Transport(detail) => A2AError::Unreachable(detail),
            other => other,
        }
    }
}

/// Result type alias for A2A operations
pub type A2AResult<T> = Result<T, A2AError>;

impl From<reqwest::Error> for A2AError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            A2AError::Transport(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            A2AError::Transport(format!("Connection error: {}", err))
        } else if err.is_decode() {
            A2AError::Protocol(err.to_string())
        } else {
            A2AError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for A2AError {
    fn from(err: url::ParseError) -> Self {
        A2AError::Config(format!("Invalid URL: {}", err))
    }
}
