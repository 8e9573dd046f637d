//! # Success Finalizer and Failure Compensator
//!
//! The two terminal handlers of every chain. The finalizer runs as the last
//! link once every step succeeded; the compensator runs when a step fails
//! terminally or exhausts its retries, and receives only the failure link
//! (the lifecycle id), never the parameter bag.
//!
//! These are the only places that move a lifecycle out of `*_in_progress`.

use super::task_tracker::TaskStatusTracker;
use crate::constants::messages;
use crate::error::{Result, StepError};
use crate::logging::log_workflow_operation;
use crate::messaging::{FailureLink, StepMessage, TaskStatusRefs};
use crate::models::HostLifecycle;
use crate::persistence::{HostRepository, LifecycleStore};
use crate::state_machine::{LifecycleEvent, WorkflowKind};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the finalizer did with a lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizationAction {
    /// Lifecycle moved to its success state
    Completed(HostLifecycle),
    /// Lifecycle was already in its success state
    AlreadyFinalized(HostLifecycle),
    /// Lifecycle no longer exists
    LifecycleMissing,
}

/// What the compensator did with a lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    Compensated,
    /// Lifecycle had already left its in-progress state
    AlreadyTerminal,
    LifecycleMissing,
    /// The failure state could not be written
    Unrecorded,
}

impl CompensationOutcome {
    pub fn is_recorded(&self) -> bool {
        !matches!(self, Self::Unrecorded)
    }
}

pub fn success_message(workflow: WorkflowKind) -> &'static str {
    match workflow {
        WorkflowKind::Creation => messages::CREATION_SUCCEEDED,
        WorkflowKind::Deletion => messages::DELETION_SUCCEEDED,
    }
}

#[derive(Clone)]
pub struct SuccessFinalizer {
    lifecycles: Arc<dyn LifecycleStore>,
    hosts: Arc<dyn HostRepository>,
    tracker: TaskStatusTracker,
}

impl SuccessFinalizer {
    pub fn new(
        lifecycles: Arc<dyn LifecycleStore>,
        hosts: Arc<dyn HostRepository>,
        tracker: TaskStatusTracker,
    ) -> Self {
        Self {
            lifecycles,
            hosts,
            tracker,
        }
    }

    /// Move the lifecycle named by the final step's message to its success state
    pub async fn finalize(&self, message: &StepMessage) -> Result<FinalizationAction> {
        let Some(lifecycle) = self.lifecycles.get(message.lifecycle_id).await? else {
            warn!(lifecycle_id = %message.lifecycle_id, "Lifecycle vanished before finalization");
            return Ok(FinalizationAction::LifecycleMissing);
        };

        let workflow = message.workflow;
        if lifecycle.status == workflow.success_state() {
            return Ok(FinalizationAction::AlreadyFinalized(lifecycle));
        }

        // The local host goes first so a redelivered finalize can still
        // complete the lifecycle after a partial failure
        if workflow == WorkflowKind::Deletion {
            let removed = self.hosts.delete(lifecycle.host_id).await?;
            if !removed {
                info!(host_id = lifecycle.host_id, "Local host record was already removed");
            }
        }

        let updated = self
            .lifecycles
            .transition(lifecycle.id, LifecycleEvent::Complete, success_message(workflow))
            .await?;

        self.tracker
            .workflow_finished(message.task_status, None)
            .await;

        log_workflow_operation(
            "finalize",
            updated.id,
            updated.host_id,
            &workflow.to_string(),
            updated.status.as_str(),
            Some(success_message(workflow)),
        );
        Ok(FinalizationAction::Completed(updated))
    }
}

#[derive(Clone)]
pub struct FailureCompensator {
    lifecycles: Arc<dyn LifecycleStore>,
    tracker: TaskStatusTracker,
}

impl FailureCompensator {
    pub fn new(lifecycles: Arc<dyn LifecycleStore>, tracker: TaskStatusTracker) -> Self {
        Self {
            lifecycles,
            tracker,
        }
    }

    /// Record the failure state for `link`. Never returns an error.
    pub async fn compensate(
        &self,
        link: FailureLink,
        error: &StepError,
        task_status: Option<TaskStatusRefs>,
    ) -> CompensationOutcome {
        // Full detail goes to the log only
        error!(
            lifecycle_id = %link.lifecycle_id,
            operation = error.operation(),
            kind = %error.kind(),
            error = %error,
            "Workflow failed, compensating"
        );

        let lifecycle = match self.lifecycles.get(link.lifecycle_id).await {
            Ok(Some(lifecycle)) => lifecycle,
            Ok(None) => {
                warn!(lifecycle_id = %link.lifecycle_id, "Lifecycle not found, nothing to compensate");
                return CompensationOutcome::LifecycleMissing;
            }
            Err(e) => {
                error!(lifecycle_id = %link.lifecycle_id, error = %e, "Failed to load lifecycle for compensation");
                return CompensationOutcome::Unrecorded;
            }
        };

        if !lifecycle.is_in_flight() {
            info!(
                lifecycle_id = %lifecycle.id,
                status = %lifecycle.status,
                "Lifecycle already terminal, skipping compensation"
            );
            return CompensationOutcome::AlreadyTerminal;
        }

        let public_message = error.public_message();
        match self
            .lifecycles
            .transition(lifecycle.id, LifecycleEvent::Fail, public_message)
            .await
        {
            Ok(updated) => {
                self.tracker
                    .workflow_finished(task_status, Some(public_message))
                    .await;
                log_workflow_operation(
                    "compensate",
                    updated.id,
                    updated.host_id,
                    &updated.status.workflow().to_string(),
                    updated.status.as_str(),
                    Some(public_message),
                );
                CompensationOutcome::Compensated
            }
            Err(e) => {
                error!(lifecycle_id = %lifecycle.id, error = %e, "Failed to record workflow failure");
                CompensationOutcome::Unrecorded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerminalReason;
    use crate::models::NewHost;
    use crate::orchestration::chain::deletion_chain;
    use crate::orchestration::params::StepParams;
    use crate::persistence::{InMemoryHostRepository, InMemoryLifecycleStore, InMemoryTaskStatusStore};
    use crate::state_machine::LifecycleState;
    use uuid::Uuid;

    struct Fixture {
        lifecycles: Arc<InMemoryLifecycleStore>,
        hosts: Arc<InMemoryHostRepository>,
        finalizer: SuccessFinalizer,
        compensator: FailureCompensator,
    }

    fn fixture() -> Fixture {
        let lifecycles = Arc::new(InMemoryLifecycleStore::new());
        let hosts = Arc::new(InMemoryHostRepository::new());
        let tracker = TaskStatusTracker::new(Arc::new(InMemoryTaskStatusStore::new()));
        Fixture {
            finalizer: SuccessFinalizer::new(lifecycles.clone(), hosts.clone(), tracker.clone()),
            compensator: FailureCompensator::new(lifecycles.clone(), tracker),
            lifecycles,
            hosts,
        }
    }

    fn new_host(name: &str) -> NewHost {
        NewHost {
            host_name: name.to_string(),
            ip: Some("10.1.0.4".to_string()),
            dns: None,
            useip: true,
            port: 10050,
            device_type: "server".to_string(),
            host_group_id: "7".to_string(),
        }
    }

    #[tokio::test]
    async fn test_deletion_finalize_removes_local_host() {
        let f = fixture();
        let host = f.hosts.insert(new_host("retired-01")).await.unwrap();
        let created = f
            .lifecycles
            .begin(host.id, WorkflowKind::Creation, None, messages::CREATION_STARTED)
            .await
            .unwrap();
        f.lifecycles
            .transition(created.id, LifecycleEvent::Complete, messages::CREATION_SUCCEEDED)
            .await
            .unwrap();
        let lifecycle = f
            .lifecycles
            .begin(host.id, WorkflowKind::Deletion, None, messages::DELETION_STARTED)
            .await
            .unwrap();
        let message = StepMessage::start(
            lifecycle.id,
            WorkflowKind::Deletion,
            deletion_chain(),
            StepParams::for_host(host.id),
            None,
        );

        let action = f.finalizer.finalize(&message).await.unwrap();
        let FinalizationAction::Completed(updated) = action else {
            panic!("expected completion, got {action:?}");
        };
        assert_eq!(updated.status, LifecycleState::Inactive);
        assert_eq!(updated.status_message, messages::DELETION_SUCCEEDED);
        assert!(f.hosts.get(host.id).await.unwrap().is_none());

        // Redelivery is harmless
        let again = f.finalizer.finalize(&message).await.unwrap();
        assert!(matches!(again, FinalizationAction::AlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn test_compensation_stores_public_message() {
        let f = fixture();
        let lifecycle = f
            .lifecycles
            .begin(3, WorkflowKind::Creation, None, messages::CREATION_STARTED)
            .await
            .unwrap();
        let err = StepError::terminal(
            "agent_deployment",
            TerminalReason::AgentInstallFailed,
            "ssh root:hunter2@10.0.0.9 failed",
        );

        let outcome = f
            .compensator
            .compensate(FailureLink { lifecycle_id: lifecycle.id }, &err, None)
            .await;
        assert_eq!(outcome, CompensationOutcome::Compensated);

        let stored = f.lifecycles.get(lifecycle.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LifecycleState::CreationFailed);
        assert_eq!(stored.status_message, messages::AGENT_INSTALL_FAILED);
        assert!(!stored.status_message.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_compensation_never_fails_for_missing_or_terminal_lifecycle() {
        let f = fixture();
        let err = StepError::transient("host.get", "timeout");

        let missing = f
            .compensator
            .compensate(FailureLink { lifecycle_id: Uuid::new_v4() }, &err, None)
            .await;
        assert_eq!(missing, CompensationOutcome::LifecycleMissing);

        let lifecycle = f
            .lifecycles
            .begin(4, WorkflowKind::Creation, None, messages::CREATION_STARTED)
            .await
            .unwrap();
        f.lifecycles
            .transition(lifecycle.id, LifecycleEvent::Complete, messages::CREATION_SUCCEEDED)
            .await
            .unwrap();
        let terminal = f
            .compensator
            .compensate(FailureLink { lifecycle_id: lifecycle.id }, &err, None)
            .await;
        assert_eq!(terminal, CompensationOutcome::AlreadyTerminal);
        assert_eq!(
            f.lifecycles.get(lifecycle.id).await.unwrap().unwrap().status,
            LifecycleState::Active
        );
    }
}
