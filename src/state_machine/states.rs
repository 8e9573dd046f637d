use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the lifecycle a workflow drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Creation,
    Deletion,
}

impl WorkflowKind {
    pub fn in_progress_state(&self) -> LifecycleState {
        match self {
            Self::Creation => LifecycleState::CreationInProgress,
            Self::Deletion => LifecycleState::DeletionInProgress,
        }
    }

    pub fn success_state(&self) -> LifecycleState {
        match self {
            Self::Creation => LifecycleState::Active,
            Self::Deletion => LifecycleState::Inactive,
        }
    }

    pub fn failure_state(&self) -> LifecycleState {
        match self {
            Self::Creation => LifecycleState::CreationFailed,
            Self::Deletion => LifecycleState::DeletionFailed,
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creation => write!(f, "creation"),
            Self::Deletion => write!(f, "deletion"),
        }
    }
}

/// Status of a `HostLifecycle` record.
///
/// Two sub-machines share the entity:
///
/// ```text
/// Creation:  (none) -> creation_in_progress -> active | creation_failed
/// Deletion:  active -> deletion_in_progress -> inactive | deletion_failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    CreationInProgress,
    Active,
    CreationFailed,
    DeletionInProgress,
    Inactive,
    DeletionFailed,
}

impl LifecycleState {
    /// Terminal states only change through a fresh orchestration call
    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::CreationInProgress | Self::DeletionInProgress)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::CreationFailed | Self::DeletionFailed)
    }

    /// The workflow a state belongs to
    pub fn workflow(&self) -> WorkflowKind {
        match self {
            Self::CreationInProgress | Self::Active | Self::CreationFailed => {
                WorkflowKind::Creation
            }
            Self::DeletionInProgress | Self::Inactive | Self::DeletionFailed => {
                WorkflowKind::Deletion
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreationInProgress => "creation_in_progress",
            Self::Active => "active",
            Self::CreationFailed => "creation_failed",
            Self::DeletionInProgress => "deletion_in_progress",
            Self::Inactive => "inactive",
            Self::DeletionFailed => "deletion_failed",
        }
    }

    pub const IN_PROGRESS: [LifecycleState; 2] =
        [Self::CreationInProgress, Self::DeletionInProgress];
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creation_in_progress" => Ok(Self::CreationInProgress),
            "active" => Ok(Self::Active),
            "creation_failed" => Ok(Self::CreationFailed),
            "deletion_in_progress" => Ok(Self::DeletionInProgress),
            "inactive" => Ok(Self::Inactive),
            "deletion_failed" => Ok(Self::DeletionFailed),
            _ => Err(format!("Invalid lifecycle state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(LifecycleState::Active.is_terminal());
        assert!(LifecycleState::Inactive.is_terminal());
        assert!(LifecycleState::CreationFailed.is_terminal());
        assert!(LifecycleState::DeletionFailed.is_terminal());
        assert!(!LifecycleState::CreationInProgress.is_terminal());
        assert!(!LifecycleState::DeletionInProgress.is_terminal());
    }

    #[test]
    fn test_workflow_targets() {
        assert_eq!(WorkflowKind::Creation.success_state(), LifecycleState::Active);
        assert_eq!(WorkflowKind::Deletion.success_state(), LifecycleState::Inactive);
        assert_eq!(
            WorkflowKind::Deletion.failure_state(),
            LifecycleState::DeletionFailed
        );
        assert_eq!(
            LifecycleState::DeletionFailed.workflow(),
            WorkflowKind::Deletion
        );
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(
            LifecycleState::CreationInProgress.to_string(),
            "creation_in_progress"
        );
        assert_eq!(
            "deletion_failed".parse::<LifecycleState>().unwrap(),
            LifecycleState::DeletionFailed
        );
        assert!("pending".parse::<LifecycleState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&LifecycleState::CreationFailed).unwrap();
        assert_eq!(json, "\"creation_failed\"");
        let parsed: LifecycleState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, LifecycleState::CreationFailed);
    }
}
