use super::states::WorkflowKind;
use serde::{Deserialize, Serialize};

/// Events that move a `HostLifecycle` between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LifecycleEvent {
    /// A fresh orchestration call enters `*_in_progress`
    Start(WorkflowKind),
    /// Every step of the chain succeeded
    Complete,
    /// A step failed terminally or exhausted its retries
    Fail,
}

impl LifecycleEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start(WorkflowKind::Creation) => "start_creation",
            Self::Start(WorkflowKind::Deletion) => "start_deletion",
            Self::Complete => "complete",
            Self::Fail => "fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Fail)
    }
}
