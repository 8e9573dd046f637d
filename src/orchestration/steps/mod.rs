//! # Workflow Steps
//!
//! Each step is an independently schedulable unit. The worker reloads the
//! step's `HostLifecycle` by id before dispatching, hands the step the
//! parameter bag from the previous link, and receives the enriched bag back.
//!
//! Steps never retry at the queue level themselves. Remote calls are wrapped
//! in [`RetryPolicy::run_inner`]; anything that still fails is returned as a
//! typed [`StepError`] and the worker decides between re-submission and
//! compensation.

use super::chain::StepKind;
use super::item_catalog::ItemCatalog;
use super::params::StepParams;
use super::retry_policy::RetryPolicy;
use crate::clients::{ConfigurationRunner, MonitoringApi};
use crate::config::HostflowConfig;
use crate::error::StepError;
use crate::models::HostLifecycle;
use crate::persistence::{HostRepository, LifecycleStore, TaskStatusStore};
use async_trait::async_trait;
use std::sync::Arc;

pub mod agent_deployment;
pub mod host_deletion;
pub mod host_existence;
pub mod host_registration;
pub mod interface_discovery;
pub mod item_provisioning;

pub use agent_deployment::AgentDeployment;
pub use host_deletion::HostDeletion;
pub use host_existence::HostExistenceCheck;
pub use host_registration::HostRegistration;
pub use interface_discovery::InterfaceDiscovery;
pub use item_provisioning::ItemProvisioning;

/// Settings the agent deployment step passes to the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub port: u16,
    pub tags: Option<String>,
}

/// Shared collaborators for step execution
#[derive(Clone)]
pub struct StepContext {
    pub lifecycles: Arc<dyn LifecycleStore>,
    pub hosts: Arc<dyn HostRepository>,
    pub task_statuses: Arc<dyn TaskStatusStore>,
    pub monitoring: Arc<dyn MonitoringApi>,
    pub runner: Arc<dyn ConfigurationRunner>,
    pub catalog: Arc<dyn ItemCatalog>,
    pub retry: RetryPolicy,
    pub agent: AgentSettings,
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("retry", &self.retry)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

/// Stores the context is built from
#[derive(Clone)]
pub struct StoreSet {
    pub lifecycles: Arc<dyn LifecycleStore>,
    pub hosts: Arc<dyn HostRepository>,
    pub task_statuses: Arc<dyn TaskStatusStore>,
}

/// Remote collaborators the context is built from
#[derive(Clone)]
pub struct ClientSet {
    pub monitoring: Arc<dyn MonitoringApi>,
    pub runner: Arc<dyn ConfigurationRunner>,
    pub catalog: Arc<dyn ItemCatalog>,
}

impl StepContext {
    pub fn new(stores: StoreSet, clients: ClientSet, config: &HostflowConfig) -> Self {
        Self {
            lifecycles: stores.lifecycles,
            hosts: stores.hosts,
            task_statuses: stores.task_statuses,
            monitoring: clients.monitoring,
            runner: clients.runner,
            catalog: clients.catalog,
            retry: RetryPolicy::from_config(&config.retry),
            agent: AgentSettings {
                port: config.runner.agent_port,
                tags: config.runner.tags.clone(),
            },
        }
    }
}

#[async_trait]
pub trait WorkflowStep: Send + Sync {
    fn kind(&self) -> StepKind;

    /// Run the step against a freshly loaded lifecycle; returns the bag for
    /// the next link
    async fn execute(
        &self,
        ctx: &StepContext,
        lifecycle: &HostLifecycle,
        params: StepParams,
    ) -> Result<StepParams, StepError>;
}

static AGENT_DEPLOYMENT: AgentDeployment = AgentDeployment;
static HOST_REGISTRATION: HostRegistration = HostRegistration;
static INTERFACE_DISCOVERY: InterfaceDiscovery = InterfaceDiscovery;
static ITEM_PROVISIONING: ItemProvisioning = ItemProvisioning;
static HOST_EXISTENCE_CHECK: HostExistenceCheck = HostExistenceCheck;
static HOST_DELETION: HostDeletion = HostDeletion;

/// Handler for a chain step
pub fn step_for(kind: StepKind) -> &'static dyn WorkflowStep {
    match kind {
        StepKind::AgentDeployment => &AGENT_DEPLOYMENT,
        StepKind::HostRegistration => &HOST_REGISTRATION,
        StepKind::InterfaceDiscovery => &INTERFACE_DISCOVERY,
        StepKind::ItemProvisioning => &ITEM_PROVISIONING,
        StepKind::HostExistenceCheck => &HOST_EXISTENCE_CHECK,
        StepKind::HostDeletion => &HOST_DELETION,
    }
}
