//! # Postgres Step Queue
//!
//! Messages live in `hostflow_step_queue`. Claiming a message pushes its
//! `visible_at` forward by the visibility timeout inside a single statement
//! that skips rows other workers have locked, so concurrent workers never
//! receive the same delivery.

use super::{Delivery, QueueError, QueueResult, Receipt, StepMessage, StepQueue};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct ClaimedRow {
    message_id: Uuid,
    payload: serde_json::Value,
    read_count: i32,
}

#[derive(Debug, Clone)]
pub struct PgStepQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgStepQueue {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl StepQueue for PgStepQueue {
    async fn enqueue(&self, message: &StepMessage, delay: Duration) -> QueueResult<()> {
        let payload = serde_json::to_value(message).map_err(QueueError::serialization)?;

        sqlx::query(
            "INSERT INTO hostflow_step_queue (message_id, queue_name, payload, visible_at) \
             VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))",
        )
        .bind(message.message_id)
        .bind(&self.queue_name)
        .bind(payload)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        debug!(
            queue = %self.queue_name,
            message_id = %message.message_id,
            delay_ms = delay.as_millis() as u64,
            "Message enqueued"
        );
        Ok(())
    }

    async fn dequeue(&self, visibility_timeout: Duration) -> QueueResult<Option<Delivery>> {
        let row = sqlx::query_as::<_, ClaimedRow>(
            "UPDATE hostflow_step_queue \
             SET visible_at = NOW() + make_interval(secs => $2), read_count = read_count + 1 \
             WHERE message_id = ( \
                 SELECT message_id FROM hostflow_step_queue \
                 WHERE queue_name = $1 AND visible_at <= NOW() \
                 ORDER BY visible_at \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING message_id, payload, read_count",
        )
        .bind(&self.queue_name)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message: StepMessage =
            serde_json::from_value(row.payload).map_err(QueueError::deserialization)?;
        Ok(Some(Delivery {
            receipt: Receipt(row.message_id),
            message,
            delivery_count: u32::try_from(row.read_count).unwrap_or(u32::MAX),
        }))
    }

    async fn ack(&self, receipt: Receipt) -> QueueResult<()> {
        let result =
            sqlx::query("DELETE FROM hostflow_step_queue WHERE message_id = $1 AND queue_name = $2")
                .bind(receipt.0)
                .bind(&self.queue_name)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
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
        let result = sqlx::query(
            "UPDATE hostflow_step_queue SET visible_at = NOW() + make_interval(secs => $3) \
             WHERE message_id = $1 AND queue_name = $2",
        )
        .bind(receipt.0)
        .bind(&self.queue_name)
        .bind(visibility_timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownReceipt {
                receipt: receipt.0.to_string(),
            });
        }
        Ok(())
    }

    async fn depth(&self) -> QueueResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM hostflow_step_queue WHERE queue_name = $1")
                .bind(&self.queue_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
