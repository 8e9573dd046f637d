//! # In-Memory Step Queue
//!
//! Stores serialized messages with a visibility deadline, mirroring the
//! Postgres queue's semantics. Deadlines use `tokio::time::Instant`, so tests
//! running on a paused clock can step through backoff delays.

use super::{Delivery, QueueError, QueueResult, Receipt, StepMessage, StepQueue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct QueuedEntry {
    id: Uuid,
    payload: serde_json::Value,
    visible_at: Instant,
    read_count: u32,
}

#[derive(Debug, Default)]
pub struct InMemoryStepQueue {
    entries: Mutex<Vec<QueuedEntry>>,
}

impl InMemoryStepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages whose visibility deadline has passed
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.visible_at <= now)
            .count()
    }
}

#[async_trait]
impl StepQueue for InMemoryStepQueue {
    async fn enqueue(&self, message: &StepMessage, delay: Duration) -> QueueResult<()> {
        let payload = serde_json::to_value(message).map_err(QueueError::serialization)?;
        self.entries.lock().push(QueuedEntry {
            id: message.message_id,
            payload,
            visible_at: Instant::now() + delay,
            read_count: 0,
        });
        debug!(
            message_id = %message.message_id,
            delay_ms = delay.as_millis() as u64,
            "Message enqueued"
        );
        Ok(())
    }

    async fn dequeue(&self, visibility_timeout: Duration) -> QueueResult<Option<Delivery>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let Some(entry) = entries
            .iter_mut()
            .filter(|entry| entry.visible_at <= now)
            .min_by_key(|entry| entry.visible_at)
        else {
            return Ok(None);
        };

        entry.visible_at = now + visibility_timeout;
        entry.read_count += 1;

        let message: StepMessage =
            serde_json::from_value(entry.payload.clone()).map_err(QueueError::deserialization)?;
        Ok(Some(Delivery {
            receipt: Receipt(entry.id),
            message,
            delivery_count: entry.read_count,
        }))
    }

    async fn ack(&self, receipt: Receipt) -> QueueResult<()> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != receipt.0);
        if entries.len() == before {
            return Err(QueueError::UnknownReceipt {
                receipt: receipt.0.to_string(),
            });
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        receipt: Receipt,
        visibility_timeout: Duration,
    ) -> QueueResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == receipt.0)
            .ok_or_else(|| QueueError::UnknownReceipt {
                receipt: receipt.0.to_string(),
            })?;
        entry.visible_at = Instant::now() + visibility_timeout;
        Ok(())
    }

    async fn depth(&self) -> QueueResult<usize> {
        Ok(self.entries.lock().len())
    }
}
