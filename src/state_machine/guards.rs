use super::errors::{StateMachineError, StateMachineResult};
use super::events::LifecycleEvent;
use super::states::{LifecycleState, WorkflowKind};

/// Single source of truth for lifecycle transition legality.
///
/// Stores call [`TransitionGuard::target_state`] before writing, so the
/// in-memory and Postgres implementations accept exactly the same moves.
pub struct TransitionGuard;

impl TransitionGuard {
    /// Resolve the state an event leads to from `current`, or reject it.
    pub fn target_state(
        current: Option<LifecycleState>,
        event: LifecycleEvent,
    ) -> StateMachineResult<LifecycleState> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        let target = match (current, event) {
            // Creation needs a host that is not monitored; deletion one that is
            (None | Some(CreationFailed | Inactive), Start(WorkflowKind::Creation)) => {
                Some(CreationInProgress)
            }
            (Some(Active | DeletionFailed), Start(WorkflowKind::Deletion)) => {
                Some(DeletionInProgress)
            }

            (Some(CreationInProgress), Complete) => Some(Active),
            (Some(CreationInProgress), Fail) => Some(CreationFailed),
            (Some(DeletionInProgress), Complete) => Some(Inactive),
            (Some(DeletionInProgress), Fail) => Some(DeletionFailed),

            _ => None,
        };

        target.ok_or_else(|| StateMachineError::InvalidTransition {
            from: current,
            event: event.event_type().to_string(),
        })
    }

    pub fn can_transition(current: Option<LifecycleState>, event: LifecycleEvent) -> bool {
        Self::target_state(current, event).is_ok()
    }
}
