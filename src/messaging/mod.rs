//! # Messaging
//!
//! The durable step queue the worker pool drains. Delivery is at-least-once:
//! a dequeued message stays invisible for the visibility timeout and comes
//! back if it is not acknowledged in time, so every handler must tolerate
//! seeing the same message twice. Long-running handlers extend the deadline
//! with [`StepQueue::extend_visibility`] while they work.
//!
//! - [`InMemoryStepQueue`]: process-local queue for tests and single-node runs
//! - [`PgStepQueue`]: Postgres table claimed with `FOR UPDATE SKIP LOCKED`

pub mod errors;
pub mod in_memory;
pub mod message;
pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

pub use errors::{QueueError, QueueResult};
pub use in_memory::InMemoryStepQueue;
pub use message::{FailureLink, StepMessage, TaskStatusRefs};
pub use postgres::PgStepQueue;

/// Handle used to acknowledge a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Receipt(pub Uuid);

#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub message: StepMessage,
    /// How many times this message has been handed out, including this one
    pub delivery_count: u32,
}

#[async_trait]
pub trait StepQueue: Send + Sync {
    /// Enqueue `message`, invisible to consumers for `delay`
    async fn enqueue(&self, message: &StepMessage, delay: Duration) -> QueueResult<()>;

    /// Claim the oldest visible message for `visibility_timeout`
    async fn dequeue(&self, visibility_timeout: Duration) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, receipt: Receipt) -> QueueResult<()>;

    /// Push a claimed message's visibility deadline to `visibility_timeout`
    /// from now, keeping it hidden while its handler is still running
    async fn extend_visibility(
        &self,
        receipt: Receipt,
        visibility_timeout: Duration,
    ) -> QueueResult<()>;

    /// Messages currently stored, visible or not
    async fn depth(&self) -> QueueResult<usize>;
}
