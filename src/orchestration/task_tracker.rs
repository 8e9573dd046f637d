//! # Task Status Tracking
//!
//! Simple-check workflows record their progress as a task-status tree: one
//! parent per workflow and one child per executed step attempt. The parent
//! aggregates its children's outcomes.
//!
//! Tracking is best effort once the workflow is running. A failed write is
//! logged and never changes the outcome of a step.

use crate::messaging::TaskStatusRefs;
use crate::orchestration::chain::StepKind;
use crate::persistence::{PersistenceResult, TaskStatusStore};
use crate::state_machine::WorkflowKind;
use crate::models::TaskState;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskStatusTracker {
    store: Arc<dyn TaskStatusStore>,
}

impl std::fmt::Debug for TaskStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStatusTracker").finish_non_exhaustive()
    }
}

impl TaskStatusTracker {
    pub fn new(store: Arc<dyn TaskStatusStore>) -> Self {
        Self { store }
    }

    pub fn operation_type(workflow: WorkflowKind) -> &'static str {
        match workflow {
            WorkflowKind::Creation => "host_creation",
            WorkflowKind::Deletion => "host_deletion",
        }
    }

    /// Parent record for a workflow about to be dispatched
    pub async fn begin_workflow(&self, workflow: WorkflowKind) -> PersistenceResult<TaskStatusRefs> {
        let parent = self
            .store
            .create(Self::operation_type(workflow), None)
            .await?;
        self.store
            .update_status(parent.id, TaskState::InProgress, None)
            .await?;
        Ok(TaskStatusRefs {
            parent_id: parent.id,
        })
    }

    /// Child record for one step attempt
    pub async fn step_started(&self, refs: Option<TaskStatusRefs>, step: StepKind) -> Option<Uuid> {
        let refs = refs?;
        let result = async {
            let child = self.store.create(step.name(), Some(refs.parent_id)).await?;
            self.store
                .update_status(child.id, TaskState::InProgress, None)
                .await?;
            Ok::<_, crate::persistence::PersistenceError>(child.id)
        }
        .await;

        match result {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(parent_id = %refs.parent_id, step = %step, error = %e, "Failed to record step task status");
                None
            }
        }
    }

    /// Close a child record; `error` carries the public message of a failure
    pub async fn step_finished(
        &self,
        refs: Option<TaskStatusRefs>,
        child_id: Option<Uuid>,
        error: Option<&str>,
    ) {
        let (Some(refs), Some(child_id)) = (refs, child_id) else {
            return;
        };
        let state = if error.is_some() {
            TaskState::Failed
        } else {
            TaskState::Completed
        };

        let result = async {
            self.store.update_status(child_id, state, error).await?;
            self.store
                .record_child_outcome(refs.parent_id, error.is_none())
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(child_id = %child_id, error = %e, "Failed to close step task status");
        }
    }

    /// Close the parent record when the workflow reaches a terminal state
    pub async fn workflow_finished(&self, refs: Option<TaskStatusRefs>, error: Option<&str>) {
        let Some(refs) = refs else {
            return;
        };
        let state = if error.is_some() {
            TaskState::Failed
        } else {
            TaskState::Completed
        };
        if let Err(e) = self.store.update_status(refs.parent_id, state, error).await {
            warn!(parent_id = %refs.parent_id, error = %e, "Failed to close workflow task status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryTaskStatusStore;

    #[tokio::test]
    async fn test_tree_counts_follow_step_outcomes() {
        let store = Arc::new(InMemoryTaskStatusStore::new());
        let tracker = TaskStatusTracker::new(store.clone());

        let refs = tracker.begin_workflow(WorkflowKind::Creation).await.unwrap();
        let first = tracker
            .step_started(Some(refs), StepKind::AgentDeployment)
            .await;
        tracker
            .step_finished(Some(refs), first, Some("Monitoring service unavailable"))
            .await;
        let second = tracker
            .step_started(Some(refs), StepKind::AgentDeployment)
            .await;
        tracker.step_finished(Some(refs), second, None).await;
        tracker.workflow_finished(Some(refs), None).await;

        let parent = store.get(refs.parent_id).await.unwrap().unwrap();
        assert_eq!(parent.operation_type, "host_creation");
        assert_eq!(parent.status, TaskState::Completed);
        assert_eq!(parent.succeeded_count, 1);
        assert_eq!(parent.failed_count, 1);
        assert!(parent.completed_at.is_some());

        let children = store.children(refs.parent_id).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|child| child.status.is_finished()));
    }

    #[tokio::test]
    async fn test_untracked_workflow_is_a_no_op() {
        let store = Arc::new(InMemoryTaskStatusStore::new());
        let tracker = TaskStatusTracker::new(store);

        assert!(tracker
            .step_started(None, StepKind::HostRegistration)
            .await
            .is_none());
        tracker.step_finished(None, None, None).await;
        tracker.workflow_finished(None, Some("failed")).await;
    }
}
