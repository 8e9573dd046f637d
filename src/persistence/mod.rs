//! # Persistence Layer
//!
//! Repository traits that stand between the orchestration engine and its
//! storage. Steps and handlers only ever see these traits, so transition
//! legality lives in one place ([`crate::state_machine::TransitionGuard`]) and
//! the whole workflow can be exercised without a database.
//!
//! Two implementations ship with the crate:
//!
//! - [`in_memory`]: process-local, used by tests and single-node setups
//! - [`postgres`]: durable `sqlx` implementation sharing a `PgPool`

pub mod in_memory;
pub mod postgres;

use crate::models::{
    Host, HostCredentials, HostLifecycle, NewHost, SshCredentials, TaskState, TaskStatus,
};
use crate::state_machine::{LifecycleEvent, LifecycleState, StateMachineError, WorkflowKind};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use in_memory::{InMemoryHostRepository, InMemoryLifecycleStore, InMemoryTaskStatusStore};
pub use postgres::{PgHostRepository, PgLifecycleStore, PgTaskStatusStore};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Lifecycle {id} not found")]
    LifecycleNotFound { id: Uuid },

    #[error("Host {host_id} not found")]
    HostNotFound { host_id: i64 },

    #[error("Task status {id} not found")]
    TaskStatusNotFound { id: Uuid },

    #[error("Host {host_id} already has a lifecycle in flight ({status})")]
    LifecycleInFlight {
        host_id: i64,
        status: LifecycleState,
    },

    #[error("Host name {host_name} already exists")]
    DuplicateHostName { host_name: String },

    #[error("Transition rejected: {0}")]
    Transition(#[from] StateMachineError),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Persisted `HostLifecycle` records and their transitions
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Enter `workflow`'s in-progress state for a host.
    ///
    /// Re-uses the host's existing record when it is terminal, creates one
    /// when the host has none, and fails with
    /// [`PersistenceError::LifecycleInFlight`] when another workflow is
    /// still running for the host.
    async fn begin(
        &self,
        host_id: i64,
        workflow: WorkflowKind,
        monitoring_category_id: Option<i64>,
        message: &str,
    ) -> PersistenceResult<HostLifecycle>;

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<HostLifecycle>>;

    async fn find_by_host(&self, host_id: i64) -> PersistenceResult<Option<HostLifecycle>>;

    /// Apply a terminal event, validated against the transition table
    async fn transition(
        &self,
        id: Uuid,
        event: LifecycleEvent,
        message: &str,
    ) -> PersistenceResult<HostLifecycle>;

    async fn set_message(&self, id: Uuid, message: &str) -> PersistenceResult<()>;
}

/// Host inventory as seen by the orchestration engine
#[async_trait]
pub trait HostRepository: Send + Sync {
    async fn insert(&self, host: NewHost) -> PersistenceResult<Host>;

    async fn get(&self, id: i64) -> PersistenceResult<Option<Host>>;

    async fn set_remote_host_id(&self, id: i64, remote_host_id: &str) -> PersistenceResult<()>;

    /// Returns whether a record was removed
    async fn delete(&self, id: i64) -> PersistenceResult<bool>;

    async fn credentials(&self, host_id: i64) -> PersistenceResult<Option<HostCredentials>>;

    /// Create the host's credentials if absent; an existing row is returned untouched
    async fn ensure_credentials(
        &self,
        host_id: i64,
        credentials: &SshCredentials,
    ) -> PersistenceResult<HostCredentials>;
}

/// Task-status operation tree
#[async_trait]
pub trait TaskStatusStore: Send + Sync {
    async fn create(
        &self,
        operation_type: &str,
        parent_id: Option<Uuid>,
    ) -> PersistenceResult<TaskStatus>;

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<TaskStatus>>;

    async fn children(&self, parent_id: Uuid) -> PersistenceResult<Vec<TaskStatus>>;

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskState,
        error_message: Option<&str>,
    ) -> PersistenceResult<()>;

    /// Bump the parent's succeeded or failed counter
    async fn record_child_outcome(&self, parent_id: Uuid, succeeded: bool)
        -> PersistenceResult<()>;
}
