//! # Step Message Envelope
//!
//! Everything a worker needs to execute one link of a chain travels in the
//! message: the whole chain, the current position, the outer attempt counter
//! and the accumulated parameter bag. The failure link deliberately carries
//! only the lifecycle id.

use crate::orchestration::chain::ChainLink;
use crate::orchestration::params::StepParams;
use crate::state_machine::WorkflowKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload for the failure compensator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLink {
    pub lifecycle_id: Uuid,
}

/// Task-status records attached to a simple-check workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusRefs {
    pub parent_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMessage {
    pub message_id: Uuid,
    /// Shared by every message of one workflow instance
    pub correlation_id: Uuid,
    pub lifecycle_id: Uuid,
    pub host_id: i64,
    pub workflow: WorkflowKind,
    pub chain: Vec<ChainLink>,
    pub position: usize,
    /// Outer attempt for the current link, starting at 1
    pub attempt: u32,
    pub params: StepParams,
    pub on_failure: FailureLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatusRefs>,
    pub created_at: DateTime<Utc>,
}

impl StepMessage {
    /// First message of a chain
    pub fn start(
        lifecycle_id: Uuid,
        workflow: WorkflowKind,
        chain: Vec<ChainLink>,
        params: StepParams,
        task_status: Option<TaskStatusRefs>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            lifecycle_id,
            host_id: params.host_id,
            workflow,
            chain,
            position: 0,
            attempt: 1,
            params,
            on_failure: FailureLink { lifecycle_id },
            task_status,
            created_at: Utc::now(),
        }
    }

    pub fn current_link(&self) -> Option<ChainLink> {
        self.chain.get(self.position).copied()
    }

    /// Message for the following link, carrying the step's output
    pub fn advance(&self, params: StepParams) -> Option<Self> {
        let position = self.position + 1;
        if position >= self.chain.len() {
            return None;
        }
        Some(Self {
            message_id: Uuid::new_v4(),
            position,
            attempt: 1,
            params,
            created_at: Utc::now(),
            ..self.clone()
        })
    }

    /// Same link, next outer attempt
    pub fn retry(&self) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            attempt: self.attempt + 1,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}
