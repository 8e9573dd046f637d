//! # In-Memory Persistence
//!
//! Process-local implementations of the persistence traits. Semantics match
//! the Postgres implementations, including the one-in-flight-lifecycle rule
//! and transition validation, so the end-to-end tests exercise the same
//! contract production does.

use super::{
    HostRepository, LifecycleStore, PersistenceError, PersistenceResult, TaskStatusStore,
};
use crate::models::{
    Host, HostCredentials, HostLifecycle, NewHost, SshCredentials, TaskState, TaskStatus,
};
use crate::constants::REMOTE_ID_UNSET;
use crate::state_machine::{LifecycleEvent, TransitionGuard, WorkflowKind};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryLifecycleStore {
    records: Mutex<HashMap<Uuid, HostLifecycle>>,
}

impl InMemoryLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, for assertions
    pub fn snapshot(&self) -> Vec<HostLifecycle> {
        self.records.lock().values().cloned().collect()
    }
}

#[async_trait]
impl LifecycleStore for InMemoryLifecycleStore {
    async fn begin(
        &self,
        host_id: i64,
        workflow: WorkflowKind,
        monitoring_category_id: Option<i64>,
        message: &str,
    ) -> PersistenceResult<HostLifecycle> {
        let mut records = self.records.lock();

        let existing = records
            .values_mut()
            .filter(|record| record.host_id == host_id)
            .max_by_key(|record| record.updated_at);

        match existing {
            Some(record) => {
                if record.is_in_flight() {
                    return Err(PersistenceError::LifecycleInFlight {
                        host_id,
                        status: record.status,
                    });
                }
                record.status =
                    TransitionGuard::target_state(Some(record.status), LifecycleEvent::Start(workflow))?;
                record.status_message = message.to_string();
                if monitoring_category_id.is_some() {
                    record.monitoring_category_id = monitoring_category_id;
                }
                record.updated_at = Utc::now();
                Ok(record.clone())
            }
            None => {
                TransitionGuard::target_state(None, LifecycleEvent::Start(workflow))?;
                let record = HostLifecycle::new(host_id, workflow, monitoring_category_id, message);
                records.insert(record.id, record.clone());
                Ok(record)
            }
        }
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<HostLifecycle>> {
        Ok(self.records.lock().get(&id).cloned())
    }

    async fn find_by_host(&self, host_id: i64) -> PersistenceResult<Option<HostLifecycle>> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|record| record.host_id == host_id)
            .max_by_key(|record| record.updated_at)
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        event: LifecycleEvent,
        message: &str,
    ) -> PersistenceResult<HostLifecycle> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&id)
            .ok_or(PersistenceError::LifecycleNotFound { id })?;

        record.status = TransitionGuard::target_state(Some(record.status), event)?;
        record.status_message = message.to_string();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn set_message(&self, id: Uuid, message: &str) -> PersistenceResult<()> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&id)
            .ok_or(PersistenceError::LifecycleNotFound { id })?;
        record.status_message = message.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryHostRepository {
    hosts: Mutex<HashMap<i64, Host>>,
    credentials: DashMap<i64, HostCredentials>,
    next_id: Mutex<i64>,
}

impl InMemoryHostRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostRepository for InMemoryHostRepository {
    async fn insert(&self, host: NewHost) -> PersistenceResult<Host> {
        let mut hosts = self.hosts.lock();
        if hosts.values().any(|h| h.host_name == host.host_name) {
            return Err(PersistenceError::DuplicateHostName {
                host_name: host.host_name,
            });
        }

        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };

        let record = Host {
            id,
            host_name: host.host_name,
            ip: host.ip,
            dns: host.dns,
            useip: host.useip,
            port: host.port,
            device_type: host.device_type,
            host_group_id: host.host_group_id,
            remote_host_id: REMOTE_ID_UNSET.to_string(),
        };
        hosts.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> PersistenceResult<Option<Host>> {
        Ok(self.hosts.lock().get(&id).cloned())
    }

    async fn set_remote_host_id(&self, id: i64, remote_host_id: &str) -> PersistenceResult<()> {
        let mut hosts = self.hosts.lock();
        let host = hosts
            .get_mut(&id)
            .ok_or(PersistenceError::HostNotFound { host_id: id })?;
        host.remote_host_id = remote_host_id.to_string();
        Ok(())
    }

    async fn delete(&self, id: i64) -> PersistenceResult<bool> {
        self.credentials.remove(&id);
        Ok(self.hosts.lock().remove(&id).is_some())
    }

    async fn credentials(&self, host_id: i64) -> PersistenceResult<Option<HostCredentials>> {
        Ok(self.credentials.get(&host_id).map(|entry| entry.clone()))
    }

    async fn ensure_credentials(
        &self,
        host_id: i64,
        credentials: &SshCredentials,
    ) -> PersistenceResult<HostCredentials> {
        if !self.hosts.lock().contains_key(&host_id) {
            return Err(PersistenceError::HostNotFound { host_id });
        }
        let entry = self
            .credentials
            .entry(host_id)
            .or_insert_with(|| HostCredentials {
                host_id,
                credentials: credentials.clone(),
            });
        Ok(entry.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStatusStore {
    records: DashMap<Uuid, TaskStatus>,
}

impl InMemoryTaskStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStatusStore for InMemoryTaskStatusStore {
    async fn create(
        &self,
        operation_type: &str,
        parent_id: Option<Uuid>,
    ) -> PersistenceResult<TaskStatus> {
        let record = TaskStatus::new(operation_type, parent_id);
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<TaskStatus>> {
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn children(&self, parent_id: Uuid) -> PersistenceResult<Vec<TaskStatus>> {
        let mut children: Vec<TaskStatus> = self
            .records
            .iter()
            .filter(|entry| entry.parent_id == Some(parent_id))
            .map(|entry| entry.clone())
            .collect();
        children.sort_by_key(|child| child.created_at);
        Ok(children)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskState,
        error_message: Option<&str>,
    ) -> PersistenceResult<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or(PersistenceError::TaskStatusNotFound { id })?;
        let now = Utc::now();
        record.status = status;
        if let Some(message) = error_message {
            record.error_message = Some(message.to_string());
        }
        record.updated_at = now;
        if status.is_finished() {
            record.completed_at = Some(now);
        }
        Ok(())
    }

    async fn record_child_outcome(
        &self,
        parent_id: Uuid,
        succeeded: bool,
    ) -> PersistenceResult<()> {
        let mut record = self
            .records
            .get_mut(&parent_id)
            .ok_or(PersistenceError::TaskStatusNotFound { id: parent_id })?;
        if succeeded {
            record.succeeded_count += 1;
        } else {
            record.failed_count += 1;
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{LifecycleState, StateMachineError};

    fn new_host(name: &str) -> NewHost {
        NewHost {
            host_name: name.to_string(),
            ip: Some("10.0.0.5".to_string()),
            dns: None,
            useip: true,
            port: 10050,
            device_type: "server".to_string(),
            host_group_id: "42".to_string(),
        }
    }

    #[tokio::test]
    async fn test_begin_rejects_second_in_flight_workflow() {
        let store = InMemoryLifecycleStore::new();
        store
            .begin(1, WorkflowKind::Creation, None, "started")
            .await
            .unwrap();

        let err = store
            .begin(1, WorkflowKind::Deletion, None, "started")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::LifecycleInFlight {
                host_id: 1,
                status: LifecycleState::CreationInProgress
            }
        ));
    }

    #[tokio::test]
    async fn test_begin_reuses_terminal_record() {
        let store = InMemoryLifecycleStore::new();
        let first = store
            .begin(1, WorkflowKind::Creation, Some(9), "started")
            .await
            .unwrap();
        store
            .transition(first.id, LifecycleEvent::Fail, "failed")
            .await
            .unwrap();

        let retry = store
            .begin(1, WorkflowKind::Creation, None, "again")
            .await
            .unwrap();
        assert_eq!(retry.id, first.id);
        assert_eq!(retry.status, LifecycleState::CreationInProgress);
        assert_eq!(retry.monitoring_category_id, Some(9));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_deletion_of_unprovisioned_host_is_rejected() {
        let store = InMemoryLifecycleStore::new();
        let err = store
            .begin(1, WorkflowKind::Deletion, None, "started")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Transition(StateMachineError::InvalidTransition { from: None, .. })
        ));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_creation_of_active_host_is_rejected() {
        let store = InMemoryLifecycleStore::new();
        let first = store
            .begin(1, WorkflowKind::Creation, None, "started")
            .await
            .unwrap();
        store
            .transition(first.id, LifecycleEvent::Complete, "done")
            .await
            .unwrap();

        let err = store
            .begin(1, WorkflowKind::Creation, None, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Transition(_)));
        let current = store.get(first.id).await.unwrap().unwrap();
        assert_eq!(current.status, LifecycleState::Active);
        assert_eq!(current.status_message, "done");
    }

    #[tokio::test]
    async fn test_transition_validated() {
        let store = InMemoryLifecycleStore::new();
        let lifecycle = store
            .begin(1, WorkflowKind::Creation, None, "started")
            .await
            .unwrap();
        store
            .transition(lifecycle.id, LifecycleEvent::Complete, "done")
            .await
            .unwrap();

        let err = store
            .transition(lifecycle.id, LifecycleEvent::Fail, "late failure")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::Transition(StateMachineError::InvalidTransition { .. })
        ));
        let current = store.get(lifecycle.id).await.unwrap().unwrap();
        assert_eq!(current.status, LifecycleState::Active);
        assert_eq!(current.status_message, "done");
    }

    #[tokio::test]
    async fn test_credentials_created_once() {
        let repo = InMemoryHostRepository::new();
        let host = repo.insert(new_host("web-01")).await.unwrap();

        let first = repo
            .ensure_credentials(host.id, &SshCredentials::new("root", "one"))
            .await
            .unwrap();
        let second = repo
            .ensure_credentials(host.id, &SshCredentials::new("admin", "two"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.credentials.username, "root");
    }

    #[tokio::test]
    async fn test_host_names_are_unique() {
        let repo = InMemoryHostRepository::new();
        repo.insert(new_host("web-01")).await.unwrap();
        let err = repo.insert(new_host("web-01")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::DuplicateHostName { .. }));
    }

    #[tokio::test]
    async fn test_task_status_tree_counts() {
        let store = InMemoryTaskStatusStore::new();
        let parent = store.create("host_creation", None).await.unwrap();
        let child = store
            .create("host_registration", Some(parent.id))
            .await
            .unwrap();

        store
            .update_status(child.id, TaskState::Completed, None)
            .await
            .unwrap();
        store.record_child_outcome(parent.id, true).await.unwrap();

        let parent = store.get(parent.id).await.unwrap().unwrap();
        assert_eq!(parent.succeeded_count, 1);
        assert_eq!(parent.failed_count, 0);

        let children = store.children(parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].status, TaskState::Completed);
        assert!(children[0].completed_at.is_some());
    }
}
