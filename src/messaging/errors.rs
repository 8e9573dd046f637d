//! # Messaging Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Unknown receipt: {receipt}")]
    UnknownReceipt { receipt: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueueError {
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::MessageSerialization {
            message: err.to_string(),
        }
    }

    pub fn deserialization(err: impl std::fmt::Display) -> Self {
        Self::MessageDeserialization {
            message: err.to_string(),
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
