//! Hostflow Worker Binary
//!
//! Runs the step worker pool against Postgres until interrupted. Workflows are
//! submitted through [`hostflow_core::HostOrchestrator`] by the embedding
//! service; this process only executes them.

use anyhow::Context;
use hostflow_core::clients::{CommandConfigurationRunner, JsonRpcMonitoringClient, MonitoringApi};
use hostflow_core::config::{ConfigManager, QueueBackend};
use hostflow_core::database::{DatabaseConnection, DatabaseMigrations};
use hostflow_core::logging::init_console_logging;
use hostflow_core::messaging::{InMemoryStepQueue, PgStepQueue, StepQueue};
use hostflow_core::orchestration::{ClientSet, StaticItemCatalog, StepContext, StepWorker, StoreSet, WorkerPool};
use hostflow_core::persistence::{PgHostRepository, PgLifecycleStore, PgTaskStatusStore};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_console_logging();

    let manager = ConfigManager::load().context("loading configuration")?;
    let config = manager.config();
    info!(environment = manager.environment(), "🚀 Starting hostflow worker");

    let db = DatabaseConnection::connect(&config.database)
        .await
        .context("connecting to database")?;
    DatabaseMigrations::run_all(db.pool())
        .await
        .context("running migrations")?;

    let stores = StoreSet {
        lifecycles: Arc::new(PgLifecycleStore::new(db.pool().clone())),
        hosts: Arc::new(PgHostRepository::new(db.pool().clone())),
        task_statuses: Arc::new(PgTaskStatusStore::new(db.pool().clone())),
    };

    let queue: Arc<dyn StepQueue> = match config.queue.backend {
        QueueBackend::Postgres => Arc::new(PgStepQueue::new(
            db.pool().clone(),
            config.queue.queue_name.clone(),
        )),
        QueueBackend::Memory => {
            warn!("In-memory queue selected; workflows submitted by other processes will not be seen");
            Arc::new(InMemoryStepQueue::new())
        }
    };

    let monitoring = JsonRpcMonitoringClient::new(&config.remote_api)?;
    if config.remote_api.login_credentials().is_some() {
        monitoring
            .refresh_session()
            .await
            .context("logging in to the monitoring API")?;
        info!(url = %config.remote_api.url, "Monitoring API session established");
    } else {
        warn!("No monitoring API credentials configured; calls will be unauthenticated");
    }

    let clients = ClientSet {
        monitoring: Arc::new(monitoring),
        runner: Arc::new(CommandConfigurationRunner::new(&config.runner)),
        catalog: Arc::new(StaticItemCatalog::from_config(&config.templates)),
    };

    let context = StepContext::new(stores, clients, config);
    let worker = Arc::new(StepWorker::new(context, queue, &config.queue));
    let handle = WorkerPool::new(worker, &config.worker, &config.queue).start();
    info!(workers = config.worker.count, "✅ Worker pool running");

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("🛑 Shutdown signal received");

    handle.shutdown().await?;
    db.close().await;
    info!("Worker stopped");
    Ok(())
}
