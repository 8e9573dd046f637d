//! Fully wired in-memory engine for unit and integration tests.

use super::fakes::{ScriptedMonitoringApi, ScriptedRunner};
use crate::clients::ItemSpec;
use crate::config::{HostflowConfig, TemplateConfig};
use crate::constants::messages;
use crate::messaging::InMemoryStepQueue;
use crate::models::{Host, HostLifecycle, NewHost, SshCredentials};
use crate::orchestration::item_catalog::{StaticItemCatalog, TemplateSelection};
use crate::orchestration::orchestrator::{CreationRequest, HostOrchestrator};
use crate::orchestration::params::StepParams;
use crate::orchestration::steps::{ClientSet, StepContext, StoreSet};
use crate::orchestration::worker::{ProcessOutcome, StepWorker, WorkerPool};
use crate::persistence::{
    HostRepository, InMemoryHostRepository, InMemoryLifecycleStore, InMemoryTaskStatusStore,
    LifecycleStore,
};
use crate::state_machine::{LifecycleEvent, WorkflowKind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Template every test host is provisioned with
pub const TEST_TEMPLATE: &str = "linux";

/// Upper bound on messages [`TestHarness::drain`] handles
const DRAIN_LIMIT: usize = 200;

/// Configuration with zero delays so retried messages are visible at once
pub fn test_config() -> HostflowConfig {
    let mut config = HostflowConfig::default();
    config.retry.backoff_seconds = 0;
    config.retry.inner_delay_ms = 0;
    config.queue.poll_interval_ms = 5;
    config.queue.visibility_timeout_seconds = 30;
    config.queue.heartbeat_interval_ms = 10_000;
    config.worker.shutdown_timeout_seconds = 5;
    config.templates.insert(
        TEST_TEMPLATE.to_string(),
        TemplateConfig {
            items: vec![
                ItemSpec::new("CPU load", "system.cpu.load[all,avg1]"),
                ItemSpec::new("Free memory", "vm.memory.size[available]"),
            ],
        },
    );
    config
}

pub struct TestHarness {
    pub config: HostflowConfig,
    pub lifecycles: Arc<InMemoryLifecycleStore>,
    pub hosts: Arc<InMemoryHostRepository>,
    pub task_statuses: Arc<InMemoryTaskStatusStore>,
    pub queue: Arc<InMemoryStepQueue>,
    pub monitoring: Arc<ScriptedMonitoringApi>,
    pub runner: Arc<ScriptedRunner>,
    pub context: StepContext,
    pub orchestrator: HostOrchestrator,
    pub worker: Arc<StepWorker>,
    next_address: AtomicU8,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: HostflowConfig) -> Self {
        let lifecycles = Arc::new(InMemoryLifecycleStore::new());
        let hosts = Arc::new(InMemoryHostRepository::new());
        let task_statuses = Arc::new(InMemoryTaskStatusStore::new());
        let queue = Arc::new(InMemoryStepQueue::new());
        let monitoring = Arc::new(ScriptedMonitoringApi::new());
        let runner = Arc::new(ScriptedRunner::new());

        let stores = StoreSet {
            lifecycles: lifecycles.clone(),
            hosts: hosts.clone(),
            task_statuses: task_statuses.clone(),
        };
        let clients = ClientSet {
            monitoring: monitoring.clone(),
            runner: runner.clone(),
            catalog: Arc::new(StaticItemCatalog::from_config(&config.templates)),
        };

        let context = StepContext::new(stores.clone(), clients, &config);
        let orchestrator = HostOrchestrator::new(&stores, queue.clone(), &config.orchestration);
        let worker = Arc::new(StepWorker::new(context.clone(), queue.clone(), &config.queue));

        Self {
            config,
            lifecycles,
            hosts,
            task_statuses,
            queue,
            monitoring,
            runner,
            context,
            orchestrator,
            worker,
            next_address: AtomicU8::new(10),
        }
    }

    pub fn context(&self) -> &StepContext {
        &self.context
    }

    pub fn pool(&self, workers: usize) -> WorkerPool {
        let mut worker_config = self.config.worker.clone();
        worker_config.count = workers;
        WorkerPool::new(self.worker.clone(), &worker_config, &self.config.queue)
    }

    pub async fn insert_host(&self, name: &str) -> Host {
        let octet = self.next_address.fetch_add(1, Ordering::Relaxed);
        self.hosts
            .insert(NewHost {
                host_name: name.to_string(),
                ip: Some(format!("10.0.0.{octet}")),
                dns: Some(format!("{name}.example.internal")),
                useip: true,
                port: 10050,
                device_type: "server".to_string(),
                host_group_id: "2".to_string(),
            })
            .await
            .expect("insert test host")
    }

    /// A host whose creation workflow already finished, so deletion may start
    pub async fn provisioned_host(&self, name: &str) -> Host {
        let host = self.insert_host(name).await;
        let lifecycle = self
            .lifecycles
            .begin(host.id, WorkflowKind::Creation, None, messages::CREATION_STARTED)
            .await
            .expect("begin creation");
        self.lifecycles
            .transition(lifecycle.id, LifecycleEvent::Complete, messages::CREATION_SUCCEEDED)
            .await
            .expect("complete creation");
        host
    }

    pub fn creation_request(&self, host_id: i64) -> CreationRequest {
        CreationRequest::new(host_id, TemplateSelection::new([TEST_TEMPLATE]))
    }

    pub async fn lifecycle(&self, id: Uuid) -> HostLifecycle {
        self.lifecycles
            .get(id)
            .await
            .expect("read lifecycle")
            .expect("lifecycle exists")
    }

    /// Process messages until the queue has nothing visible
    pub async fn drain(&self) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..DRAIN_LIMIT {
            match self.worker.process_next().await.expect("process message") {
                ProcessOutcome::Idle => return outcomes,
                outcome => outcomes.push(outcome),
            }
        }
        panic!("queue did not drain within {DRAIN_LIMIT} messages: {outcomes:?}");
    }

    /// A host with a creation lifecycle and the bag the orchestrator would build
    pub async fn creation_input(
        &self,
        name: &str,
        with_credentials: bool,
    ) -> (HostLifecycle, StepParams) {
        let host = self.insert_host(name).await;
        let lifecycle = self
            .lifecycles
            .begin(host.id, WorkflowKind::Creation, None, messages::CREATION_STARTED)
            .await
            .expect("begin creation");
        let params = StepParams {
            host_name: Some(host.host_name.clone()),
            host_group_id: Some(host.host_group_id.clone()),
            network: Some(host.network_params()),
            credentials: with_credentials.then(|| SshCredentials::new("root", "changeme")),
            templates: Some(TemplateSelection::new([TEST_TEMPLATE])),
            ..StepParams::for_host(host.id)
        };
        (lifecycle, params)
    }

    /// A host with a deletion lifecycle; `remote_host_id` is what the caller supplied
    pub async fn deletion_input(
        &self,
        name: &str,
        remote_host_id: Option<&str>,
    ) -> (HostLifecycle, StepParams) {
        let host = self.provisioned_host(name).await;
        let lifecycle = self
            .lifecycles
            .begin(host.id, WorkflowKind::Deletion, None, messages::DELETION_STARTED)
            .await
            .expect("begin deletion");
        let params = StepParams {
            host_name: Some(host.host_name.clone()),
            host_group_id: Some(host.host_group_id.clone()),
            remote_host_id: remote_host_id.map(str::to_string),
            ..StepParams::for_host(host.id)
        };
        (lifecycle, params)
    }
}
