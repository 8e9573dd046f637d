//! Scripted stand-ins for the monitoring backend and the configuration
//! runner. Both keep enough state to behave like the real thing (ids are
//! unique, deleted hosts disappear) and let tests inject failures per method.

use crate::clients::{
    ConfigurationRunner, FailedTask, HostCreateRequest, HostQuery, ItemSpec, MonitoringApi,
    RemoteHost, RunnerReport, RunnerRequest, RunnerStats,
};
use crate::error::{StepError, TerminalReason};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

/// Call name [`ScriptedMonitoringApi`] records session refreshes under
pub const SESSION_REFRESH: &str = "session.refresh";

pub fn success_report() -> RunnerReport {
    RunnerReport {
        overall_success: true,
        successfully_executed_tasks: vec!["install agent".to_string(), "start agent".to_string()],
        unsuccessfully_executed_tasks: Vec::new(),
        stats: RunnerStats {
            total: 2,
            successful: 2,
            failed: 0,
        },
    }
}

pub fn failed_report(task: &str, details: &str) -> RunnerReport {
    RunnerReport {
        overall_success: false,
        successfully_executed_tasks: Vec::new(),
        unsuccessfully_executed_tasks: vec![FailedTask {
            task: task.to_string(),
            details: details.to_string(),
        }],
        stats: RunnerStats {
            total: 1,
            successful: 0,
            failed: 1,
        },
    }
}

#[derive(Debug, Default)]
struct MonitoringState {
    next_id: u64,
    hosts: BTreeMap<String, RemoteHost>,
    interfaces: HashMap<String, Vec<String>>,
    items: HashMap<String, Vec<String>>,
    calls: HashMap<String, usize>,
    next_failures: HashMap<String, VecDeque<StepError>>,
    standing_failures: HashMap<String, StepError>,
    no_item_ids: bool,
    session_expired: bool,
}

impl MonitoringState {
    fn allocate(&mut self) -> String {
        self.next_id += 1;
        (10_000 + self.next_id).to_string()
    }

    fn add_host(&mut self, name: &str, with_interface: bool) -> String {
        let hostid = self.allocate();
        self.hosts.insert(
            hostid.clone(),
            RemoteHost {
                hostid: hostid.clone(),
                host: name.to_string(),
                name: name.to_string(),
            },
        );
        let interfaces = if with_interface {
            vec![self.allocate()]
        } else {
            Vec::new()
        };
        self.interfaces.insert(hostid.clone(), interfaces);
        hostid
    }
}

/// In-memory monitoring backend
#[derive(Debug, Default)]
pub struct ScriptedMonitoringApi {
    state: Mutex<MonitoringState>,
}

impl ScriptedMonitoringApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call of `method` with `error`
    pub fn fail_next(&self, method: &str, error: StepError) {
        self.state
            .lock()
            .next_failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `method` with `error`
    pub fn always_fail(&self, method: &str, error: StepError) {
        self.state
            .lock()
            .standing_failures
            .insert(method.to_string(), error);
    }

    /// `item.create` succeeds but reports no ids
    pub fn return_no_item_ids(&self) {
        self.state.lock().no_item_ids = true;
    }

    /// Register a host with one interface, bypassing the call log
    pub fn register_host(&self, name: &str) -> String {
        self.state.lock().add_host(name, true)
    }

    /// Register a host that has no interfaces
    pub fn register_bare_host(&self, name: &str) -> String {
        self.state.lock().add_host(name, false)
    }

    pub fn interfaces_of(&self, remote_host_id: &str) -> Vec<String> {
        self.state
            .lock()
            .interfaces
            .get(remote_host_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn items_of(&self, remote_host_id: &str) -> Vec<String> {
        self.state
            .lock()
            .items
            .get(remote_host_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn remote_host_count(&self) -> usize {
        self.state.lock().hosts.len()
    }

    pub fn has_host(&self, remote_host_id: &str) -> bool {
        self.state.lock().hosts.contains_key(remote_host_id)
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Reject every call with an invalid-session error until the session is refreshed
    pub fn expire_session(&self) {
        self.state.lock().session_expired = true;
    }

    fn begin_call(&self, method: &str) -> Result<parking_lot::MutexGuard<'_, MonitoringState>, StepError> {
        let mut state = self.state.lock();
        *state.calls.entry(method.to_string()).or_default() += 1;
        if state.session_expired && !matches!(method, "user.login" | SESSION_REFRESH) {
            return Err(StepError::auth_invalid(
                method,
                "Session terminated, re-login, please.",
            ));
        }
        if let Some(error) = state
            .next_failures
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(error) = state.standing_failures.get(method) {
            return Err(error.clone());
        }
        Ok(state)
    }
}

#[async_trait]
impl MonitoringApi for ScriptedMonitoringApi {
    async fn login(&self, username: &str, _password: &str) -> Result<String, StepError> {
        self.begin_call("user.login")?;
        Ok(format!("token-{username}"))
    }

    async fn refresh_session(&self) -> Result<(), StepError> {
        let mut state = self.begin_call(SESSION_REFRESH)?;
        state.session_expired = false;
        Ok(())
    }

    async fn create_host_group(&self, _name: &str) -> Result<String, StepError> {
        let mut state = self.begin_call("hostgroup.create")?;
        Ok(state.allocate())
    }

    async fn create_user_group(
        &self,
        _name: &str,
        _host_group_id: &str,
        _permission: u8,
    ) -> Result<String, StepError> {
        let mut state = self.begin_call("usergroup.create")?;
        Ok(state.allocate())
    }

    async fn create_host(&self, request: &HostCreateRequest) -> Result<String, StepError> {
        let mut state = self.begin_call("host.create")?;
        if state.hosts.values().any(|host| host.host == request.host_name) {
            return Err(StepError::terminal(
                "host.create",
                TerminalReason::AlreadyExists,
                format!("Host with the same name \"{}\" already exists.", request.host_name),
            ));
        }
        Ok(state.add_host(&request.host_name, true))
    }

    async fn get_hosts(&self, query: &HostQuery) -> Result<Vec<RemoteHost>, StepError> {
        let state = self.begin_call("host.get")?;
        Ok(state
            .hosts
            .values()
            .filter(|host| match query {
                HostQuery::ById(id) => &host.hostid == id,
                HostQuery::ByName(name) => &host.host == name,
            })
            .cloned()
            .collect())
    }

    async fn get_host_interfaces(&self, remote_host_id: &str) -> Result<Vec<String>, StepError> {
        let state = self.begin_call("hostinterface.get")?;
        Ok(state
            .interfaces
            .get(remote_host_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_items(
        &self,
        remote_host_id: &str,
        _interface_id: &str,
        items: &[ItemSpec],
    ) -> Result<Vec<String>, StepError> {
        let mut state = self.begin_call("item.create")?;
        if state.no_item_ids {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = items.iter().map(|_| state.allocate()).collect();
        state
            .items
            .entry(remote_host_id.to_string())
            .or_default()
            .extend(ids.iter().cloned());
        Ok(ids)
    }

    async fn delete_hosts(&self, remote_host_ids: &[String]) -> Result<Vec<String>, StepError> {
        let mut state = self.begin_call("host.delete")?;
        let mut deleted = Vec::new();
        for id in remote_host_ids {
            if state.hosts.remove(id).is_some() {
                state.interfaces.remove(id);
                state.items.remove(id);
                deleted.push(id.clone());
            }
        }
        Ok(deleted)
    }
}

#[derive(Debug)]
struct RunnerState {
    scripted: VecDeque<Result<RunnerReport, StepError>>,
    fallback: Result<RunnerReport, StepError>,
    requests: Vec<RunnerRequest>,
    delay: Duration,
}

/// Configuration runner that replays scripted reports, then a fallback
#[derive(Debug)]
pub struct ScriptedRunner {
    state: Mutex<RunnerState>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self {
            state: Mutex::new(RunnerState {
                scripted: VecDeque::new(),
                fallback: Ok(success_report()),
                requests: Vec::new(),
                delay: Duration::ZERO,
            }),
        }
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: Result<RunnerReport, StepError>) {
        self.state.lock().scripted.push_back(outcome);
    }

    /// Outcome once the scripted ones are used up
    pub fn always(&self, outcome: Result<RunnerReport, StepError>) {
        self.state.lock().fallback = outcome;
    }

    /// How long every run takes before reporting
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    pub fn runs(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn last_request(&self) -> Option<RunnerRequest> {
        self.state.lock().requests.last().cloned()
    }
}

#[async_trait]
impl ConfigurationRunner for ScriptedRunner {
    async fn run(&self, request: &RunnerRequest) -> Result<RunnerReport, StepError> {
        let (outcome, delay) = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            let outcome = match state.scripted.pop_front() {
                Some(outcome) => outcome,
                None => state.fallback.clone(),
            };
            (outcome, state.delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
