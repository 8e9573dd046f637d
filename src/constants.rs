//! # System Constants
//!
//! Event names, retry defaults and the fixed user-facing messages persisted
//! on lifecycle records.

use std::time::Duration;

/// Workflow and step events emitted through structured logging
pub mod events {
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_RETRY_SCHEDULED: &str = "step.retry_scheduled";
    pub const STEP_ESCALATED: &str = "step.escalated";
    pub const STEP_SKIPPED: &str = "step.skipped";
}

/// Retry and timing defaults
pub mod defaults {
    use super::Duration;

    /// Outer (queue-level) attempts per step, including the first one
    pub const MAX_ATTEMPTS: u32 = 3;
    /// Delay before a retryable step is re-submitted
    pub const BACKOFF: Duration = Duration::from_secs(5);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(300);
    /// Inner attempts around a single remote call
    pub const INNER_ATTEMPTS: u32 = 3;
    pub const INNER_DELAY: Duration = Duration::from_secs(2);
    /// Per remote call timeout
    pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(15);
    pub const RUNNER_TIMEOUT: Duration = Duration::from_secs(600);
    /// Port the monitoring agent listens on
    pub const AGENT_PORT: u16 = 10050;
    pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(120);
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
    pub const WORKER_COUNT: usize = 4;
}

/// Remote-side identifier of a host that has not been registered yet
pub const REMOTE_ID_UNSET: &str = "unset";

/// Generic status messages. These are the only strings written to
/// `HostLifecycle.status_message` on failure.
pub mod messages {
    pub const CREATION_STARTED: &str = "Host creation started";
    pub const DELETION_STARTED: &str = "Host deletion started";
    pub const CREATION_SUCCEEDED: &str = "Host created and monitoring configured";
    pub const DELETION_SUCCEEDED: &str = "Host removed from monitoring";
    pub const CREATION_FAILED: &str = "Host creation failed";
    pub const DELETION_FAILED: &str = "Host deletion failed";

    pub const REMOTE_UNAVAILABLE: &str = "Monitoring service unavailable, retries exhausted";
    pub const REMOTE_AUTH_REJECTED: &str = "Monitoring service rejected the session";
    pub const REMOTE_REJECTED: &str = "Monitoring service rejected the request";
    pub const REMOTE_EMPTY_RESPONSE: &str = "Monitoring service returned no identifiers";
    pub const REMOTE_INVALID_RESPONSE: &str = "Monitoring service returned an unexpected response";
    pub const HOST_ALREADY_REGISTERED: &str = "Host is already registered in monitoring";
    pub const HOST_NOT_FOUND_REMOTE: &str = "Host was not found in monitoring";
    pub const INTERFACE_MISSING: &str = "Host has no network interface in monitoring";
    pub const AGENT_INSTALL_FAILED: &str = "Monitoring agent installation failed";
    pub const WORKFLOW_MISCONFIGURED: &str = "Workflow is missing required configuration";
    pub const INTERNAL_FAILURE: &str = "Internal error while recording progress";
}
