//! # Host Lifecycle Model
//!
//! Orchestration state for one host. A record is created the first time a
//! workflow starts for a host and is re-used by later workflows: a new
//! provisioning attempt moves the same record back into `*_in_progress`.
//!
//! ## Database Schema
//!
//! Maps to `hostflow_host_lifecycles`:
//! ```sql
//! CREATE TABLE hostflow_host_lifecycles (
//!   id UUID PRIMARY KEY,
//!   host_id BIGINT NOT NULL,
//!   monitoring_category_id BIGINT,
//!   status VARCHAR NOT NULL,
//!   status_message TEXT NOT NULL DEFAULT '',
//!   -- ... timestamps
//! );
//! CREATE UNIQUE INDEX ... ON hostflow_host_lifecycles (host_id)
//!   WHERE status IN ('creation_in_progress', 'deletion_in_progress');
//! ```

use crate::state_machine::{LifecycleState, WorkflowKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLifecycle {
    pub id: Uuid,
    pub host_id: i64,
    /// Monitoring category / template grouping chosen for the host
    pub monitoring_category_id: Option<i64>,
    pub status: LifecycleState,
    pub status_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostLifecycle {
    pub fn new(
        host_id: i64,
        workflow: WorkflowKind,
        monitoring_category_id: Option<i64>,
        status_message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            host_id,
            monitoring_category_id,
            status: workflow.in_progress_state(),
            status_message: status_message.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_progress()
    }

    /// Whether a step of `workflow` may still act on this record
    pub fn accepts_work_for(&self, workflow: WorkflowKind) -> bool {
        self.status == workflow.in_progress_state()
    }
}
