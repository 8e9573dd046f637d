//! # Postgres Persistence
//!
//! `sqlx` implementations of the persistence traits. All three stores share
//! one `PgPool`. Queries are built at runtime and mapped through `FromRow`
//! row types so the crate builds without a live database.
//!
//! Lifecycle starts run inside a transaction holding a row lock on the host's
//! current record. The partial unique index on `host_id` for in-progress
//! statuses backs that up when two starts race on a host with no record yet.

use super::{
    HostRepository, LifecycleStore, PersistenceError, PersistenceResult, TaskStatusStore,
};
use crate::constants::REMOTE_ID_UNSET;
use crate::models::{
    Host, HostCredentials, HostLifecycle, NewHost, SshCredentials, TaskState, TaskStatus,
};
use crate::state_machine::{LifecycleEvent, LifecycleState, TransitionGuard, WorkflowKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

const LIFECYCLE_COLUMNS: &str =
    "id, host_id, monitoring_category_id, status, status_message, created_at, updated_at";

const HOST_COLUMNS: &str =
    "id, host_name, ip, dns, useip, port, device_type, host_group_id, remote_host_id";

const TASK_STATUS_COLUMNS: &str = "id, operation_type, parent_id, status, succeeded_count, \
     failed_count, error_message, created_at, updated_at, completed_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[derive(Debug, FromRow)]
struct LifecycleRow {
    id: Uuid,
    host_id: i64,
    monitoring_category_id: Option<i64>,
    status: String,
    status_message: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LifecycleRow> for HostLifecycle {
    type Error = PersistenceError;

    fn try_from(row: LifecycleRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<LifecycleState>()
            .map_err(PersistenceError::InvalidData)?;
        Ok(HostLifecycle {
            id: row.id,
            host_id: row.host_id,
            monitoring_category_id: row.monitoring_category_id,
            status,
            status_message: row.status_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgLifecycleStore {
    pool: PgPool,
}

impl PgLifecycleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one(&self, id: Uuid) -> PersistenceResult<Option<HostLifecycle>> {
        let sql = format!("SELECT {LIFECYCLE_COLUMNS} FROM hostflow_host_lifecycles WHERE id = $1");
        sqlx::query_as::<_, LifecycleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(HostLifecycle::try_from)
            .transpose()
    }
}

#[async_trait]
impl LifecycleStore for PgLifecycleStore {
    #[instrument(skip(self, message), fields(workflow = %workflow))]
    async fn begin(
        &self,
        host_id: i64,
        workflow: WorkflowKind,
        monitoring_category_id: Option<i64>,
        message: &str,
    ) -> PersistenceResult<HostLifecycle> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {LIFECYCLE_COLUMNS} FROM hostflow_host_lifecycles \
             WHERE host_id = $1 ORDER BY updated_at DESC LIMIT 1 FOR UPDATE"
        );
        let current = sqlx::query_as::<_, LifecycleRow>(&sql)
            .bind(host_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(HostLifecycle::try_from)
            .transpose()?;

        let row = match current {
            Some(existing) => {
                if existing.is_in_flight() {
                    return Err(PersistenceError::LifecycleInFlight {
                        host_id,
                        status: existing.status,
                    });
                }
                let next = TransitionGuard::target_state(
                    Some(existing.status),
                    LifecycleEvent::Start(workflow),
                )?;
                let sql = format!(
                    "UPDATE hostflow_host_lifecycles \
                     SET status = $2, status_message = $3, \
                         monitoring_category_id = COALESCE($4, monitoring_category_id), \
                         updated_at = NOW() \
                     WHERE id = $1 RETURNING {LIFECYCLE_COLUMNS}"
                );
                sqlx::query_as::<_, LifecycleRow>(&sql)
                    .bind(existing.id)
                    .bind(next.as_str())
                    .bind(message)
                    .bind(monitoring_category_id)
                    .fetch_one(&mut *tx)
                    .await
            }
            None => {
                TransitionGuard::target_state(None, LifecycleEvent::Start(workflow))?;
                let record = HostLifecycle::new(host_id, workflow, monitoring_category_id, message);
                let sql = format!(
                    "INSERT INTO hostflow_host_lifecycles \
                     (id, host_id, monitoring_category_id, status, status_message, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING {LIFECYCLE_COLUMNS}"
                );
                sqlx::query_as::<_, LifecycleRow>(&sql)
                    .bind(record.id)
                    .bind(record.host_id)
                    .bind(record.monitoring_category_id)
                    .bind(record.status.as_str())
                    .bind(&record.status_message)
                    .bind(record.created_at)
                    .fetch_one(&mut *tx)
                    .await
            }
        };

        let row = match row {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                return Err(PersistenceError::LifecycleInFlight {
                    host_id,
                    status: workflow.in_progress_state(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        tx.commit().await?;
        debug!(host_id, lifecycle_id = %row.id, "Lifecycle entered in-progress state");
        HostLifecycle::try_from(row)
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<HostLifecycle>> {
        self.fetch_one(id).await
    }

    async fn find_by_host(&self, host_id: i64) -> PersistenceResult<Option<HostLifecycle>> {
        let sql = format!(
            "SELECT {LIFECYCLE_COLUMNS} FROM hostflow_host_lifecycles \
             WHERE host_id = $1 ORDER BY updated_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, LifecycleRow>(&sql)
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?
            .map(HostLifecycle::try_from)
            .transpose()
    }

    #[instrument(skip(self, message), fields(event = event.event_type()))]
    async fn transition(
        &self,
        id: Uuid,
        event: LifecycleEvent,
        message: &str,
    ) -> PersistenceResult<HostLifecycle> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {LIFECYCLE_COLUMNS} FROM hostflow_host_lifecycles WHERE id = $1 FOR UPDATE"
        );
        let current = sqlx::query_as::<_, LifecycleRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .map(HostLifecycle::try_from)
            .transpose()?
            .ok_or(PersistenceError::LifecycleNotFound { id })?;

        let next = TransitionGuard::target_state(Some(current.status), event)?;

        let sql = format!(
            "UPDATE hostflow_host_lifecycles \
             SET status = $2, status_message = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {LIFECYCLE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, LifecycleRow>(&sql)
            .bind(id)
            .bind(next.as_str())
            .bind(message)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        HostLifecycle::try_from(row)
    }

    async fn set_message(&self, id: Uuid, message: &str) -> PersistenceResult<()> {
        let result = sqlx::query(
            "UPDATE hostflow_host_lifecycles SET status_message = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::LifecycleNotFound { id });
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct HostRow {
    id: i64,
    host_name: String,
    ip: Option<String>,
    dns: Option<String>,
    useip: bool,
    port: i32,
    device_type: String,
    host_group_id: String,
    remote_host_id: String,
}

impl TryFrom<HostRow> for Host {
    type Error = PersistenceError;

    fn try_from(row: HostRow) -> Result<Self, Self::Error> {
        let port = u16::try_from(row.port).map_err(|_| {
            PersistenceError::InvalidData(format!("host {} has invalid port {}", row.id, row.port))
        })?;
        Ok(Host {
            id: row.id,
            host_name: row.host_name,
            ip: row.ip,
            dns: row.dns,
            useip: row.useip,
            port,
            device_type: row.device_type,
            host_group_id: row.host_group_id,
            remote_host_id: row.remote_host_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct CredentialsRow {
    host_id: i64,
    username: String,
    password: String,
}

impl From<CredentialsRow> for HostCredentials {
    fn from(row: CredentialsRow) -> Self {
        HostCredentials {
            host_id: row.host_id,
            credentials: SshCredentials::new(row.username, row.password),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgHostRepository {
    pool: PgPool,
}

impl PgHostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostRepository for PgHostRepository {
    async fn insert(&self, host: NewHost) -> PersistenceResult<Host> {
        let sql = format!(
            "INSERT INTO hostflow_hosts \
             (host_name, ip, dns, useip, port, device_type, host_group_id, remote_host_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {HOST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, HostRow>(&sql)
            .bind(&host.host_name)
            .bind(&host.ip)
            .bind(&host.dns)
            .bind(host.useip)
            .bind(i32::from(host.port))
            .bind(&host.device_type)
            .bind(&host.host_group_id)
            .bind(REMOTE_ID_UNSET)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    PersistenceError::DuplicateHostName {
                        host_name: host.host_name.clone(),
                    }
                } else {
                    err.into()
                }
            })?;
        Host::try_from(row)
    }

    async fn get(&self, id: i64) -> PersistenceResult<Option<Host>> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hostflow_hosts WHERE id = $1");
        sqlx::query_as::<_, HostRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Host::try_from)
            .transpose()
    }

    async fn set_remote_host_id(&self, id: i64, remote_host_id: &str) -> PersistenceResult<()> {
        let result = sqlx::query(
            "UPDATE hostflow_hosts SET remote_host_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(remote_host_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::HostNotFound { host_id: id });
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> PersistenceResult<bool> {
        let result = sqlx::query("DELETE FROM hostflow_hosts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn credentials(&self, host_id: i64) -> PersistenceResult<Option<HostCredentials>> {
        let row = sqlx::query_as::<_, CredentialsRow>(
            "SELECT host_id, username, password FROM hostflow_host_credentials WHERE host_id = $1",
        )
        .bind(host_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(HostCredentials::from))
    }

    async fn ensure_credentials(
        &self,
        host_id: i64,
        credentials: &SshCredentials,
    ) -> PersistenceResult<HostCredentials> {
        sqlx::query(
            "INSERT INTO hostflow_host_credentials (host_id, username, password) \
             SELECT id, $2, $3 FROM hostflow_hosts WHERE id = $1 \
             ON CONFLICT (host_id) DO NOTHING",
        )
        .bind(host_id)
        .bind(&credentials.username)
        .bind(&credentials.password)
        .execute(&self.pool)
        .await?;

        self.credentials(host_id)
            .await?
            .ok_or(PersistenceError::HostNotFound { host_id })
    }
}

#[derive(Debug, FromRow)]
struct TaskStatusRow {
    id: Uuid,
    operation_type: String,
    parent_id: Option<Uuid>,
    status: String,
    succeeded_count: i32,
    failed_count: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskStatusRow> for TaskStatus {
    type Error = PersistenceError;

    fn try_from(row: TaskStatusRow) -> Result<Self, Self::Error> {
        Ok(TaskStatus {
            id: row.id,
            operation_type: row.operation_type,
            parent_id: row.parent_id,
            status: row
                .status
                .parse::<TaskState>()
                .map_err(PersistenceError::InvalidData)?,
            succeeded_count: row.succeeded_count,
            failed_count: row.failed_count,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgTaskStatusStore {
    pool: PgPool,
}

impl PgTaskStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStatusStore for PgTaskStatusStore {
    async fn create(
        &self,
        operation_type: &str,
        parent_id: Option<Uuid>,
    ) -> PersistenceResult<TaskStatus> {
        let record = TaskStatus::new(operation_type, parent_id);
        let sql = format!(
            "INSERT INTO hostflow_task_statuses \
             (id, operation_type, parent_id, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) RETURNING {TASK_STATUS_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskStatusRow>(&sql)
            .bind(record.id)
            .bind(&record.operation_type)
            .bind(record.parent_id)
            .bind(record.status.as_str())
            .bind(record.created_at)
            .fetch_one(&self.pool)
            .await?;
        TaskStatus::try_from(row)
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<TaskStatus>> {
        let sql = format!("SELECT {TASK_STATUS_COLUMNS} FROM hostflow_task_statuses WHERE id = $1");
        sqlx::query_as::<_, TaskStatusRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(TaskStatus::try_from)
            .transpose()
    }

    async fn children(&self, parent_id: Uuid) -> PersistenceResult<Vec<TaskStatus>> {
        let sql = format!(
            "SELECT {TASK_STATUS_COLUMNS} FROM hostflow_task_statuses \
             WHERE parent_id = $1 ORDER BY created_at"
        );
        sqlx::query_as::<_, TaskStatusRow>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TaskStatus::try_from)
            .collect()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskState,
        error_message: Option<&str>,
    ) -> PersistenceResult<()> {
        let result = sqlx::query(
            "UPDATE hostflow_task_statuses \
             SET status = $2, \
                 error_message = COALESCE($3, error_message), \
                 completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(status.is_finished())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::TaskStatusNotFound { id });
        }
        Ok(())
    }

    async fn record_child_outcome(
        &self,
        parent_id: Uuid,
        succeeded: bool,
    ) -> PersistenceResult<()> {
        let sql = if succeeded {
            "UPDATE hostflow_task_statuses \
             SET succeeded_count = succeeded_count + 1, updated_at = NOW() WHERE id = $1"
        } else {
            "UPDATE hostflow_task_statuses \
             SET failed_count = failed_count + 1, updated_at = NOW() WHERE id = $1"
        };
        let result = sqlx::query(sql).bind(parent_id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::TaskStatusNotFound { id: parent_id });
        }
        Ok(())
    }
}
