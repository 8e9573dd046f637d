//! # Step Workers
//!
//! [`StepWorker`] claims one message at a time and executes the link it
//! points at. Every message is acknowledged only after its follow-up is
//! durable: the next link enqueued, a retry scheduled, or the failure
//! recorded by the compensator. A crash in between leaves the message to
//! reappear after its visibility timeout. While a step runs, the worker
//! keeps pushing that timeout forward so a slow agent deployment is never
//! handed to a second worker.
//!
//! [`WorkerPool`] runs several workers against one queue until a shutdown
//! signal arrives on a watch channel.

use super::chain::{is_well_formed, ChainLink, StepKind};
use super::finalizer::{FailureCompensator, FinalizationAction, SuccessFinalizer};
use super::retry_policy::RetryDecision;
use super::steps::{step_for, StepContext};
use super::task_tracker::TaskStatusTracker;
use crate::config::{QueueConfig, WorkerConfig};
use crate::constants::events;
use crate::error::{ErrorKind, HostflowError, Result, StepError, TerminalReason};
use crate::logging::log_step_operation;
use crate::messaging::{Delivery, Receipt, StepQueue};
use crate::models::HostLifecycle;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// What happened to one claimed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing was visible on the queue
    Idle,
    /// Step succeeded and the next link was enqueued
    Advanced,
    /// Step failed and was re-submitted
    Retried { delay: Duration },
    /// Failure handed to the compensator
    Compensated,
    /// Success finalizer ran
    Finalized,
    /// Lifecycle no longer accepts work for this message
    Dropped,
}

pub struct StepWorker {
    context: StepContext,
    queue: Arc<dyn StepQueue>,
    finalizer: SuccessFinalizer,
    compensator: FailureCompensator,
    tracker: TaskStatusTracker,
    visibility_timeout: Duration,
    heartbeat_interval: Option<Duration>,
}

impl std::fmt::Debug for StepWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepWorker")
            .field("context", &self.context)
            .field("visibility_timeout", &self.visibility_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}

impl StepWorker {
    pub fn new(context: StepContext, queue: Arc<dyn StepQueue>, queue_config: &QueueConfig) -> Self {
        let tracker = TaskStatusTracker::new(context.task_statuses.clone());
        Self {
            finalizer: SuccessFinalizer::new(
                context.lifecycles.clone(),
                context.hosts.clone(),
                tracker.clone(),
            ),
            compensator: FailureCompensator::new(context.lifecycles.clone(), tracker.clone()),
            tracker,
            context,
            queue,
            visibility_timeout: queue_config.visibility_timeout(),
            heartbeat_interval: queue_config.heartbeat_interval(),
        }
    }

    pub fn context(&self) -> &StepContext {
        &self.context
    }

    /// Claim and handle at most one message
    pub async fn process_next(&self) -> Result<ProcessOutcome> {
        let Some(delivery) = self.queue.dequeue(self.visibility_timeout).await? else {
            return Ok(ProcessOutcome::Idle);
        };
        self.handle(&delivery).await
    }

    #[instrument(
        skip_all,
        fields(
            correlation_id = %delivery.message.correlation_id,
            lifecycle_id = %delivery.message.lifecycle_id,
            link = delivery.message.current_link().map(|link| link.name()).unwrap_or("none"),
            attempt = delivery.message.attempt,
        )
    )]
    async fn handle(&self, delivery: &Delivery) -> Result<ProcessOutcome> {
        let message = &delivery.message;
        if delivery.delivery_count > 1 {
            debug!(deliveries = delivery.delivery_count, "Message redelivered");
        }

        let link = message
            .current_link()
            .filter(|_| is_well_formed(message.workflow, &message.chain));
        let Some(link) = link else {
            warn!(chain = ?message.chain, position = message.position, "Rejecting malformed chain");
            let err = StepError::terminal(
                "chain",
                TerminalReason::Misconfigured,
                "chain is malformed or position is out of range",
            );
            return self.escalate(delivery, err).await;
        };

        let lifecycle = match self.context.lifecycles.get(message.lifecycle_id).await? {
            Some(lifecycle) if lifecycle.accepts_work_for(message.workflow) => lifecycle,
            other => {
                let reason = other
                    .map(|l| format!("lifecycle is {}", l.status))
                    .unwrap_or_else(|| "lifecycle not found".to_string());
                log_step_operation(
                    events::STEP_SKIPPED,
                    message.lifecycle_id,
                    link.name(),
                    message.attempt,
                    "dropped",
                    Some(reason.as_str()),
                );
                self.queue.ack(delivery.receipt).await?;
                return Ok(ProcessOutcome::Dropped);
            }
        };

        match link {
            ChainLink::Finalize => self.finalize(delivery).await,
            ChainLink::Step(kind) => self.run_step(delivery, kind, &lifecycle).await,
        }
    }

    async fn run_step(
        &self,
        delivery: &Delivery,
        kind: StepKind,
        lifecycle: &HostLifecycle,
    ) -> Result<ProcessOutcome> {
        let message = &delivery.message;
        log_step_operation(
            events::STEP_STARTED,
            lifecycle.id,
            kind.name(),
            message.attempt,
            "started",
            None,
        );
        let child = self.tracker.step_started(message.task_status, kind).await;

        let result = self
            .with_heartbeat(
                delivery.receipt,
                step_for(kind).execute(&self.context, lifecycle, message.params.clone()),
            )
            .await;

        match result {
            Ok(params) => {
                self.tracker
                    .step_finished(message.task_status, child, None)
                    .await;
                let next = message.advance(params).ok_or_else(|| {
                    HostflowError::OrchestrationError(format!(
                        "chain for lifecycle {} ends without a finalize link",
                        message.lifecycle_id
                    ))
                })?;
                self.queue.enqueue(&next, Duration::ZERO).await?;
                log_step_operation(
                    events::STEP_COMPLETED,
                    lifecycle.id,
                    kind.name(),
                    message.attempt,
                    "completed",
                    next.current_link().map(|link| link.name()),
                );
                self.queue.ack(delivery.receipt).await?;
                Ok(ProcessOutcome::Advanced)
            }
            Err(err) => {
                self.tracker
                    .step_finished(message.task_status, child, Some(err.public_message()))
                    .await;
                if err.kind() == ErrorKind::AuthInvalid {
                    self.refresh_session().await;
                }
                match self.context.retry.decide(&err, message.attempt) {
                    RetryDecision::Retry { delay } => {
                        self.queue.enqueue(&message.retry(), delay).await?;
                        let details = format!("retry in {}ms: {err}", delay.as_millis());
                        log_step_operation(
                            events::STEP_RETRY_SCHEDULED,
                            lifecycle.id,
                            kind.name(),
                            message.attempt,
                            err.kind().to_string().as_str(),
                            Some(details.as_str()),
                        );
                        self.queue.ack(delivery.receipt).await?;
                        Ok(ProcessOutcome::Retried { delay })
                    }
                    RetryDecision::Escalate => self.escalate(delivery, err).await,
                }
            }
        }
    }

    /// Renew the monitoring session so the retried attempt, or the next
    /// workflow, does not reuse the rejected token
    async fn refresh_session(&self) {
        match self.context.monitoring.refresh_session().await {
            Ok(()) => info!("Monitoring session refreshed after rejection"),
            Err(e) => warn!(error = %e, "Monitoring session refresh failed"),
        }
    }

    /// Drive `work` to completion, extending the message's visibility every
    /// heartbeat interval while it runs
    async fn with_heartbeat<F: Future>(&self, receipt: Receipt, work: F) -> F::Output {
        let Some(period) = self.heartbeat_interval else {
            return work.await;
        };
        tokio::pin!(work);
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticks.tick() => {
                    match self.queue.extend_visibility(receipt, self.visibility_timeout).await {
                        Ok(()) => debug!(receipt = %receipt.0, "Message visibility extended"),
                        Err(e) => warn!(
                            receipt = %receipt.0,
                            error = %e,
                            "Failed to extend message visibility"
                        ),
                    }
                }
            }
        }
    }

    async fn escalate(&self, delivery: &Delivery, err: StepError) -> Result<ProcessOutcome> {
        let message = &delivery.message;
        let details = err.clone().escalate().to_string();
        log_step_operation(
            events::STEP_ESCALATED,
            message.lifecycle_id,
            message.current_link().map(|link| link.name()).unwrap_or("none"),
            message.attempt,
            "escalated",
            Some(details.as_str()),
        );

        let outcome = self
            .compensator
            .compensate(message.on_failure, &err, message.task_status)
            .await;
        if !outcome.is_recorded() {
            // Left unacknowledged; the message comes back after the visibility timeout
            return Err(HostflowError::PersistenceError(format!(
                "failure state for lifecycle {} was not recorded",
                message.lifecycle_id
            )));
        }
        self.queue.ack(delivery.receipt).await?;
        Ok(ProcessOutcome::Compensated)
    }

    async fn finalize(&self, delivery: &Delivery) -> Result<ProcessOutcome> {
        let action = self.finalizer.finalize(&delivery.message).await?;
        if let FinalizationAction::Completed(lifecycle) = &action {
            info!(
                host_id = lifecycle.host_id,
                status = %lifecycle.status,
                event = events::WORKFLOW_COMPLETED,
                "Workflow completed"
            );
        }
        self.queue.ack(delivery.receipt).await?;
        Ok(ProcessOutcome::Finalized)
    }
}

/// Runs `count` workers polling one queue
#[derive(Debug)]
pub struct WorkerPool {
    worker: Arc<StepWorker>,
    count: usize,
    poll_interval: Duration,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    pub fn new(worker: Arc<StepWorker>, worker_config: &WorkerConfig, queue_config: &QueueConfig) -> Self {
        Self {
            worker,
            count: worker_config.count.max(1),
            poll_interval: queue_config.poll_interval(),
            shutdown_timeout: worker_config.shutdown_timeout(),
        }
    }

    pub fn start(self) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = (0..self.count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    self.worker.clone(),
                    shutdown_rx.clone(),
                    self.poll_interval,
                ))
            })
            .collect();

        info!(workers = self.count, "Worker pool started");
        WorkerPoolHandle {
            shutdown: shutdown_tx,
            handles,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    worker: Arc<StepWorker>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    debug!(worker_id, "Worker started");
    while !*shutdown.borrow() {
        let wait = match worker.process_next().await {
            Ok(ProcessOutcome::Idle) => poll_interval,
            Ok(_) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "Message processing failed");
                poll_interval
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(worker_id, "Worker stopped");
}

pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl WorkerPoolHandle {
    /// Signal every worker and wait up to the shutdown timeout for in-flight
    /// messages to finish. Workers still busy after that are aborted; their
    /// messages stay unacknowledged and are redelivered later.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let aborts: Vec<_> = self.handles.iter().map(JoinHandle::abort_handle).collect();
        match tokio::time::timeout(self.shutdown_timeout, join_all(self.handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task panicked");
                    }
                }
                info!("Worker pool stopped");
            }
            Err(_) => {
                let busy = aborts.iter().filter(|handle| !handle.is_finished()).count();
                for handle in &aborts {
                    handle.abort();
                }
                warn!(
                    busy_workers = busy,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Workers still running at shutdown timeout were aborted; their messages will be redelivered"
                );
            }
        }
        Ok(())
    }
}
