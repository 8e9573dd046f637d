//! # Host Orchestrator
//!
//! Entry point for provisioning and decommissioning. Starting a workflow
//! loads the Host, moves its lifecycle into `*_in_progress`, builds the chain
//! and enqueues the first link. The caller gets an acknowledgement right
//! away and polls the lifecycle (or task status) for the outcome; nothing a
//! step does later is reported back through these calls.
//!
//! The orchestrator makes no remote calls.

use super::chain::{creation_chain, deletion_chain, ProvisioningKind};
use super::item_catalog::TemplateSelection;
use super::params::StepParams;
use super::steps::StoreSet;
use super::task_tracker::TaskStatusTracker;
use crate::config::OrchestrationConfig;
use crate::constants::{events, messages};
use crate::error::{HostflowError, Result};
use crate::logging::log_workflow_operation;
use crate::messaging::{StepMessage, StepQueue, TaskStatusRefs};
use crate::models::{Host, NetworkParams, SshCredentials};
use crate::persistence::{HostRepository, LifecycleStore};
use crate::state_machine::{LifecycleEvent, LifecycleState, WorkflowKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

/// Input for [`HostOrchestrator::start_creation`]
#[derive(Debug, Clone, PartialEq)]
pub struct CreationRequest {
    pub host_id: i64,
    /// Overrides the addressing stored on the Host
    pub network: Option<NetworkParams>,
    /// Supplying credentials adds agent deployment to the chain
    pub credentials: Option<SshCredentials>,
    pub templates: TemplateSelection,
    /// Overrides `orchestration.provisioning_kind`
    pub provisioning: Option<ProvisioningKind>,
}

impl CreationRequest {
    pub fn new(host_id: i64, templates: TemplateSelection) -> Self {
        Self {
            host_id,
            network: None,
            credentials: None,
            templates,
            provisioning: None,
        }
    }

    pub fn with_credentials(mut self, credentials: SshCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_network(mut self, network: NetworkParams) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_provisioning(mut self, kind: ProvisioningKind) -> Self {
        self.provisioning = Some(kind);
        self
    }
}

/// "Workflow started" acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowAck {
    pub lifecycle_id: Uuid,
    pub host_id: i64,
    pub workflow: WorkflowKind,
    pub status: LifecycleState,
    pub correlation_id: Uuid,
    /// Parent task-status record, for simple-check workflows
    pub task_status_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct HostOrchestrator {
    lifecycles: Arc<dyn LifecycleStore>,
    hosts: Arc<dyn HostRepository>,
    queue: Arc<dyn StepQueue>,
    tracker: TaskStatusTracker,
    default_provisioning: ProvisioningKind,
}

impl std::fmt::Debug for HostOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostOrchestrator")
            .field("default_provisioning", &self.default_provisioning)
            .finish_non_exhaustive()
    }
}

impl HostOrchestrator {
    pub fn new(stores: &StoreSet, queue: Arc<dyn StepQueue>, config: &OrchestrationConfig) -> Self {
        Self {
            lifecycles: stores.lifecycles.clone(),
            hosts: stores.hosts.clone(),
            queue,
            tracker: TaskStatusTracker::new(stores.task_statuses.clone()),
            default_provisioning: config.provisioning_kind,
        }
    }

    async fn load_host(&self, host_id: i64) -> Result<Host> {
        self.hosts
            .get(host_id)
            .await?
            .ok_or(HostflowError::HostNotFound(host_id))
    }

    pub async fn start_creation(&self, request: CreationRequest) -> Result<WorkflowAck> {
        let host = self.load_host(request.host_id).await?;

        let network = request.network.unwrap_or_else(|| host.network_params());
        network.validate().map_err(HostflowError::ValidationError)?;
        if let Some(credentials) = &request.credentials {
            if credentials.username.trim().is_empty() {
                return Err(HostflowError::ValidationError(
                    "credentials require a username".to_string(),
                ));
            }
        }

        if let Some(credentials) = &request.credentials {
            self.hosts.ensure_credentials(host.id, credentials).await?;
        }

        let kind = request.provisioning.unwrap_or(self.default_provisioning);
        let lifecycle = self
            .lifecycles
            .begin(
                host.id,
                WorkflowKind::Creation,
                request.templates.category_id,
                messages::CREATION_STARTED,
            )
            .await?;

        let task_status = if kind.tracks_task_status() {
            match self.tracker.begin_workflow(WorkflowKind::Creation).await {
                Ok(refs) => Some(refs),
                Err(e) => {
                    self.release(lifecycle.id, None).await;
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let chain = creation_chain(kind, request.credentials.is_some());
        let params = StepParams {
            host_name: Some(host.host_name.clone()),
            host_group_id: Some(host.host_group_id.clone()),
            network: Some(network),
            credentials: request.credentials,
            templates: Some(request.templates),
            ..StepParams::for_host(host.id)
        };
        let message = StepMessage::start(lifecycle.id, WorkflowKind::Creation, chain, params, task_status);

        self.submit(&message, lifecycle.status).await
    }

    /// `remote_host_id` falls back to the id stamped on the Host; without
    /// either the existence check looks the host up by name
    pub async fn start_deletion(
        &self,
        host_id: i64,
        remote_host_id: Option<String>,
    ) -> Result<WorkflowAck> {
        let host = self.load_host(host_id).await?;
        let remote_host_id = remote_host_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| host.is_registered().then(|| host.remote_host_id.clone()));

        let lifecycle = self
            .lifecycles
            .begin(host.id, WorkflowKind::Deletion, None, messages::DELETION_STARTED)
            .await?;

        let params = StepParams {
            host_name: Some(host.host_name.clone()),
            host_group_id: Some(host.host_group_id.clone()),
            remote_host_id,
            ..StepParams::for_host(host.id)
        };
        let message = StepMessage::start(
            lifecycle.id,
            WorkflowKind::Deletion,
            deletion_chain(),
            params,
            None,
        );

        self.submit(&message, lifecycle.status).await
    }

    /// Nothing will ever run for this lifecycle; fail it so the host is free again
    async fn release(&self, lifecycle_id: Uuid, task_status: Option<TaskStatusRefs>) {
        if let Err(e) = self
            .lifecycles
            .transition(lifecycle_id, LifecycleEvent::Fail, messages::INTERNAL_FAILURE)
            .await
        {
            error!(lifecycle_id = %lifecycle_id, error = %e, "Failed to release lifecycle");
        }
        self.tracker
            .workflow_finished(task_status, Some(messages::INTERNAL_FAILURE))
            .await;
    }

    async fn submit(&self, message: &StepMessage, status: LifecycleState) -> Result<WorkflowAck> {
        if let Err(e) = self.queue.enqueue(message, Duration::ZERO).await {
            error!(lifecycle_id = %message.lifecycle_id, error = %e, "Failed to submit workflow");
            self.release(message.lifecycle_id, message.task_status).await;
            return Err(e.into());
        }

        log_workflow_operation(
            events::WORKFLOW_STARTED,
            message.lifecycle_id,
            message.host_id,
            &message.workflow.to_string(),
            status.as_str(),
            message.current_link().map(|link| link.name()),
        );

        Ok(WorkflowAck {
            lifecycle_id: message.lifecycle_id,
            host_id: message.host_id,
            workflow: message.workflow,
            status,
            correlation_id: message.correlation_id,
            task_status_id: message.task_status.map(|refs| refs.parent_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::chain::{ChainLink, StepKind};
    use crate::persistence::TaskStatusStore;
    use crate::test_helpers::TestHarness;

    #[tokio::test]
    async fn test_creation_without_credentials_starts_at_registration() {
        let harness = TestHarness::new();
        let host = harness.insert_host("plain-01").await;

        let ack = harness
            .orchestrator
            .start_creation(harness.creation_request(host.id))
            .await
            .unwrap();
        assert_eq!(ack.status, LifecycleState::CreationInProgress);

        let delivery = harness.queue.dequeue(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(
            delivery.message.current_link(),
            Some(ChainLink::Step(StepKind::HostRegistration))
        );
        assert_eq!(delivery.message.on_failure.lifecycle_id, ack.lifecycle_id);
        assert!(delivery.message.params.credentials.is_none());
    }

    #[tokio::test]
    async fn test_credentials_prepend_agent_deployment_and_are_stored_once() {
        let harness = TestHarness::new();
        let host = harness.insert_host("agent-01").await;
        let request = harness
            .creation_request(host.id)
            .with_credentials(SshCredentials::new("deploy", "s3cret"));

        harness.orchestrator.start_creation(request).await.unwrap();

        let delivery = harness.queue.dequeue(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(
            delivery.message.current_link(),
            Some(ChainLink::Step(StepKind::AgentDeployment))
        );
        let stored = harness.hosts.credentials(host.id).await.unwrap().unwrap();
        assert_eq!(stored.credentials.username, "deploy");
    }

    #[tokio::test]
    async fn test_second_workflow_for_same_host_is_rejected() {
        let harness = TestHarness::new();
        let host = harness.insert_host("busy-01").await;
        harness
            .orchestrator
            .start_creation(harness.creation_request(host.id))
            .await
            .unwrap();

        let err = harness
            .orchestrator
            .start_deletion(host.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HostflowError::WorkflowInFlight { .. }));
        assert_eq!(harness.queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_creation_of_monitored_host_is_rejected() {
        let harness = TestHarness::new();
        let host = harness.provisioned_host("live-01").await;

        let err = harness
            .orchestrator
            .start_creation(harness.creation_request(host.id))
            .await
            .unwrap_err();
        assert!(matches!(err, HostflowError::StateTransitionError(_)));
        assert_eq!(harness.queue.depth().await.unwrap(), 0);
        let lifecycle = harness.lifecycles.find_by_host(host.id).await.unwrap().unwrap();
        assert_eq!(lifecycle.status, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_deletion_of_never_provisioned_host_is_rejected() {
        let harness = TestHarness::new();
        let host = harness.insert_host("fresh-01").await;

        let err = harness
            .orchestrator
            .start_deletion(host.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HostflowError::StateTransitionError(_)));
        assert_eq!(harness.queue.depth().await.unwrap(), 0);
        assert!(harness.lifecycles.find_by_host(host.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_host() {
        let harness = TestHarness::new();
        let err = harness
            .orchestrator
            .start_deletion(404, None)
            .await
            .unwrap_err();
        assert_eq!(err, HostflowError::HostNotFound(404));
    }

    #[tokio::test]
    async fn test_simple_check_creates_parent_task_status() {
        let harness = TestHarness::new();
        let host = harness.insert_host("simple-01").await;
        let request = harness
            .creation_request(host.id)
            .with_provisioning(ProvisioningKind::SimpleCheck);

        let ack = harness.orchestrator.start_creation(request).await.unwrap();
        let parent_id = ack.task_status_id.unwrap();
        let parent = harness.task_statuses.get(parent_id).await.unwrap().unwrap();
        assert_eq!(parent.operation_type, "host_creation");
    }

    #[tokio::test]
    async fn test_invalid_network_is_rejected_before_lifecycle_starts() {
        let harness = TestHarness::new();
        let host = harness.insert_host("nodns-01").await;
        let request = harness.creation_request(host.id).with_network(NetworkParams {
            useip: false,
            ip: Some("10.0.0.1".to_string()),
            dns: None,
            port: 10050,
        });

        let err = harness.orchestrator.start_creation(request).await.unwrap_err();
        assert!(matches!(err, HostflowError::ValidationError(_)));
        assert!(harness
            .context()
            .lifecycles
            .find_by_host(host.id)
            .await
            .unwrap()
            .is_none());
    }
}
