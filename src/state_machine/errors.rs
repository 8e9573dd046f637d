use super::states::LifecycleState;
use thiserror::Error;

/// Errors raised while applying a lifecycle transition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from:?} on {event}")]
    InvalidTransition {
        from: Option<LifecycleState>,
        event: String,
    },

    #[error("Invalid state in storage: {0}")]
    InvalidStoredState(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
