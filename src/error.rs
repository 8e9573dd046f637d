//! Error types for the Hostflow orchestration engine.
//!
//! Two layers live here:
//!
//! - [`HostflowError`]: crate-level infrastructure failures (database, queue,
//!   configuration, state machine). These are what orchestration entry points
//!   and the worker loop return.
//! - [`StepError`]: the typed outcome of a failed workflow step. Its
//!   [`ErrorKind`] is fixed by the variant chosen where the error is built and
//!   drives the retry policy; nothing downstream re-derives it from text.

use crate::config::ConfigurationError;
use crate::messaging::QueueError;
use crate::persistence::PersistenceError;
use crate::state_machine::StateMachineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostflowError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
    #[error("Orchestration error: {0}")]
    OrchestrationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Persistence error: {0}")]
    PersistenceError(String),
    #[error("Host {0} not found")]
    HostNotFound(i64),
    #[error("Host {host_id} already has a workflow in flight ({status})")]
    WorkflowInFlight { host_id: i64, status: String },
    #[error("Remote client error: {0}")]
    ClientError(String),
}

impl From<serde_json::Error> for HostflowError {
    fn from(error: serde_json::Error) -> Self {
        HostflowError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for HostflowError {
    fn from(err: sqlx::Error) -> Self {
        HostflowError::DatabaseError(err.to_string())
    }
}

impl From<ConfigurationError> for HostflowError {
    fn from(err: ConfigurationError) -> Self {
        HostflowError::ConfigurationError(err.to_string())
    }
}

impl From<StateMachineError> for HostflowError {
    fn from(err: StateMachineError) -> Self {
        HostflowError::StateTransitionError(err.to_string())
    }
}

impl From<QueueError> for HostflowError {
    fn from(err: QueueError) -> Self {
        HostflowError::MessagingError(err.to_string())
    }
}

impl From<PersistenceError> for HostflowError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::LifecycleInFlight { host_id, status } => {
                HostflowError::WorkflowInFlight {
                    host_id,
                    status: status.to_string(),
                }
            }
            PersistenceError::HostNotFound { host_id } => HostflowError::HostNotFound(host_id),
            PersistenceError::Transition(e) => e.into(),
            other => HostflowError::PersistenceError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HostflowError>;

/// Retry classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network-level failure, timeout, 5xx or undecodable response
    Transient,
    /// The remote session token was rejected
    AuthInvalid,
    /// Domain failure that will not change on retry
    Terminal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::AuthInvalid)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::AuthInvalid => write!(f, "auth_invalid"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Why a terminal step failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The remote object already exists (duplicate registration)
    AlreadyExists,
    /// The remote object does not exist
    NotFound,
    /// A required sub-resource (e.g. an interface) is missing
    MissingSubResource,
    /// The remote call succeeded but returned no identifiers
    EmptyResponse,
    /// The response decoded but did not have the expected shape
    InvalidResponse,
    /// The configuration runner reported failed tasks
    AgentInstallFailed,
    /// Input or configuration needed by the step is absent
    Misconfigured,
    /// Local state could not be read or written
    Persistence,
    /// Remote API rejected the request for another reason
    Rejected,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::MissingSubResource => "missing_sub_resource",
            Self::EmptyResponse => "empty_response",
            Self::InvalidResponse => "invalid_response",
            Self::AgentInstallFailed => "agent_install_failed",
            Self::Misconfigured => "misconfigured",
            Self::Persistence => "persistence",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Failure of a single workflow step.
///
/// `message` carries full internal detail and is only ever logged. Persisted,
/// user-facing text comes from [`StepError::public_message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum StepError {
    #[error("Transient failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Remote session rejected during {operation}: {message}")]
    AuthInvalid { operation: String, message: String },

    #[error("Terminal failure during {operation} ({reason}): {message}")]
    Terminal {
        operation: String,
        reason: TerminalReason,
        message: String,
    },
}

impl StepError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn auth_invalid(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthInvalid {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn terminal(
        operation: impl Into<String>,
        reason: TerminalReason,
        message: impl Into<String>,
    ) -> Self {
        Self::Terminal {
            operation: operation.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::AuthInvalid { .. } => ErrorKind::AuthInvalid,
            Self::Terminal { .. } => ErrorKind::Terminal,
        }
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        match self {
            Self::Terminal { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            Self::Transient { operation, .. }
            | Self::AuthInvalid { operation, .. }
            | Self::Terminal { operation, .. } => operation,
        }
    }

    /// Convert a retryable error into a terminal one once retries run out.
    pub fn escalate(self) -> Self {
        match self {
            Self::Transient { operation, message } | Self::AuthInvalid { operation, message } => {
                Self::Terminal {
                    operation,
                    reason: TerminalReason::Rejected,
                    message: format!("retries exhausted: {message}"),
                }
            }
            terminal => terminal,
        }
    }

    /// Credential-free text suitable for `HostLifecycle.status_message`.
    pub fn public_message(&self) -> &'static str {
        use crate::constants::messages;
        match self {
            Self::Transient { .. } => messages::REMOTE_UNAVAILABLE,
            Self::AuthInvalid { .. } => messages::REMOTE_AUTH_REJECTED,
            Self::Terminal { reason, .. } => match reason {
                TerminalReason::AlreadyExists => messages::HOST_ALREADY_REGISTERED,
                TerminalReason::NotFound => messages::HOST_NOT_FOUND_REMOTE,
                TerminalReason::MissingSubResource => messages::INTERFACE_MISSING,
                TerminalReason::EmptyResponse => messages::REMOTE_EMPTY_RESPONSE,
                TerminalReason::InvalidResponse => messages::REMOTE_INVALID_RESPONSE,
                TerminalReason::AgentInstallFailed => messages::AGENT_INSTALL_FAILED,
                TerminalReason::Misconfigured => messages::WORKFLOW_MISCONFIGURED,
                TerminalReason::Persistence => messages::INTERNAL_FAILURE,
                TerminalReason::Rejected => messages::REMOTE_REJECTED,
            },
        }
    }
}

impl From<PersistenceError> for StepError {
    fn from(err: PersistenceError) -> Self {
        match &err {
            PersistenceError::Database(_) => StepError::transient("persistence", err.to_string()),
            _ => StepError::terminal("persistence", TerminalReason::Persistence, err.to_string()),
        }
    }
}
