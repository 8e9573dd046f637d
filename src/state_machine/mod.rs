// Lifecycle state machine for host provisioning workflows
//
// Creation and deletion share one HostLifecycle record; the transition table
// in guards.rs is consulted by every store before a status is written.

pub mod errors;
pub mod events;
pub mod guards;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::LifecycleEvent;
pub use guards::TransitionGuard;
pub use states::{LifecycleState, WorkflowKind};
