//! # Remote Monitoring Client
//!
//! JSON-RPC 2.0 client for the remote monitoring backend. One endpoint,
//! method-dispatched; every response is either `{"result": ...}` or
//! `{"error": {code, message, data}}`.
//!
//! Failures are turned into [`StepError`]s here, where the transport outcome
//! is still known:
//!
//! | outcome                                   | kind                        |
//! |-------------------------------------------|-----------------------------|
//! | connect error, timeout, HTTP 5xx          | Transient                   |
//! | body is not a JSON-RPC envelope           | Transient                   |
//! | RPC error naming an invalid session       | AuthInvalid                 |
//! | RPC error "already exists"                | Terminal(AlreadyExists)     |
//! | any other RPC error                       | Terminal(Rejected)          |
//! | result with an unexpected shape           | Terminal(InvalidResponse)   |

use crate::config::RemoteApiConfig;
use crate::error::{HostflowError, StepError, TerminalReason};
use crate::models::InterfaceDescriptor;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, warn};

const AUTH_INVALID_MARKERS: [&str; 3] = ["not authorised", "not authorized", "session terminated"];
const ALREADY_EXISTS_MARKER: &str = "already exists";

/// Monitoring item to create on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    pub key: String,
    /// Item type; 0 is a passive agent check
    #[serde(default)]
    pub item_type: u8,
    /// Value type; 3 is numeric unsigned
    #[serde(default = "default_value_type")]
    pub value_type: u8,
    #[serde(default = "default_delay")]
    pub delay: String,
}

fn default_value_type() -> u8 {
    3
}

fn default_delay() -> String {
    "60s".to_string()
}

impl ItemSpec {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            item_type: 0,
            value_type: default_value_type(),
            delay: default_delay(),
        }
    }
}

/// `host.create` input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCreateRequest {
    pub host_name: String,
    pub interface: InterfaceDescriptor,
    pub host_group_id: String,
}

/// Lookup key for `host.get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostQuery {
    ById(String),
    ByName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHost {
    pub hostid: String,
    pub host: String,
    #[serde(default)]
    pub name: String,
}

/// The remote calls the orchestration engine makes
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    /// `user.login`; the returned token is kept for later calls
    async fn login(&self, username: &str, password: &str) -> Result<String, StepError>;

    async fn create_host_group(&self, name: &str) -> Result<String, StepError>;

    /// `usergroup.create` with the given permission on one host group
    async fn create_user_group(
        &self,
        name: &str,
        host_group_id: &str,
        permission: u8,
    ) -> Result<String, StepError>;

    async fn create_host(&self, request: &HostCreateRequest) -> Result<String, StepError>;

    async fn get_hosts(&self, query: &HostQuery) -> Result<Vec<RemoteHost>, StepError>;

    /// Interface ids of a registered host
    async fn get_host_interfaces(&self, remote_host_id: &str) -> Result<Vec<String>, StepError>;

    async fn create_items(
        &self,
        remote_host_id: &str,
        interface_id: &str,
        items: &[ItemSpec],
    ) -> Result<Vec<String>, StepError>;

    /// Ids the backend reports as deleted
    async fn delete_hosts(&self, remote_host_ids: &[String]) -> Result<Vec<String>, StepError>;

    /// Obtain a fresh session after the backend rejected the current one.
    /// Clients without a service account have nothing to renew.
    async fn refresh_session(&self) -> Result<(), StepError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorBody {
    fn text(&self) -> String {
        match &self.data {
            Some(Value::String(data)) => format!("{} {}", self.message, data),
            Some(other) => format!("{} {}", self.message, other),
            None => self.message.clone(),
        }
    }
}

/// Build the typed error for an RPC-level failure
fn classify_rpc_error(operation: &str, error: &RpcErrorBody) -> StepError {
    let text = error.text();
    let lowered = text.to_lowercase();
    let detail = format!("code {}: {}", error.code, text);

    if AUTH_INVALID_MARKERS.iter().any(|m| lowered.contains(m)) {
        StepError::auth_invalid(operation, detail)
    } else if lowered.contains(ALREADY_EXISTS_MARKER) {
        StepError::terminal(operation, TerminalReason::AlreadyExists, detail)
    } else {
        StepError::terminal(operation, TerminalReason::Rejected, detail)
    }
}

fn decode<T: DeserializeOwned>(operation: &str, value: Value) -> Result<T, StepError> {
    serde_json::from_value(value).map_err(|e| {
        StepError::terminal(
            operation,
            TerminalReason::InvalidResponse,
            format!("unexpected result shape: {e}"),
        )
    })
}

fn require_ids(operation: &str, ids: Vec<String>) -> Result<Vec<String>, StepError> {
    if ids.is_empty() {
        return Err(StepError::terminal(
            operation,
            TerminalReason::EmptyResponse,
            "result contained no identifiers",
        ));
    }
    Ok(ids)
}

fn first_id(operation: &str, ids: Vec<String>) -> Result<String, StepError> {
    require_ids(operation, ids)?
        .into_iter()
        .next()
        .ok_or_else(|| StepError::terminal(operation, TerminalReason::EmptyResponse, "no id"))
}

pub struct JsonRpcMonitoringClient {
    http: reqwest::Client,
    url: String,
    token: RwLock<Option<String>>,
    service_account: Option<(String, String)>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for JsonRpcMonitoringClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcMonitoringClient")
            .field("url", &self.url)
            .field("has_session", &self.has_session())
            .field("has_service_account", &self.service_account.is_some())
            .finish()
    }
}

impl JsonRpcMonitoringClient {
    pub fn new(config: &RemoteApiConfig) -> Result<Self, HostflowError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| HostflowError::ClientError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: config.url.clone(),
            token: RwLock::new(None),
            service_account: config
                .login_credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            next_id: AtomicU64::new(1),
        })
    }

    /// Use an existing session token instead of logging in
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    pub fn has_session(&self) -> bool {
        self.token.read().is_some()
    }

    #[instrument(skip(self, params), fields(url = %self.url))]
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        authenticated: bool,
    ) -> Result<T, StepError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = if authenticated {
            self.token.read().clone()
        } else {
            None
        };

        let mut body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        if let Some(token) = token.as_ref() {
            body["auth"] = Value::String(token.clone());
        }

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = token.as_ref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            let what = if e.is_timeout() { "timed out" } else { "request failed" };
            StepError::transient(method, format!("{what}: {e}"))
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StepError::transient(method, format!("HTTP {status}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| StepError::transient(method, format!("failed to read body: {e}")))?;
        let envelope: RpcResponse = serde_json::from_str(&text).map_err(|e| {
            StepError::transient(method, format!("HTTP {status}, body is not JSON-RPC: {e}"))
        })?;

        if let Some(error) = envelope.error {
            let err = classify_rpc_error(method, &error);
            warn!(method = method, kind = %err.kind(), error = %err, "Remote call rejected");
            return Err(err);
        }

        let result = envelope.result.ok_or_else(|| {
            StepError::terminal(
                method,
                TerminalReason::InvalidResponse,
                "response carried neither result nor error",
            )
        })?;
        debug!(method = method, "Remote call succeeded");
        decode(method, result)
    }
}

#[derive(Debug, Deserialize)]
struct GroupIds {
    groupids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserGroupIds {
    usrgrpids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HostIds {
    hostids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ItemIds {
    itemids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteInterface {
    interfaceid: String,
}

#[async_trait]
impl MonitoringApi for JsonRpcMonitoringClient {
    async fn login(&self, username: &str, password: &str) -> Result<String, StepError> {
        let token: String = self
            .call(
                "user.login",
                json!({ "username": username, "password": password }),
                false,
            )
            .await?;
        if token.is_empty() {
            return Err(StepError::terminal(
                "user.login",
                TerminalReason::EmptyResponse,
                "empty session token",
            ));
        }
        *self.token.write() = Some(token.clone());
        Ok(token)
    }

    async fn refresh_session(&self) -> Result<(), StepError> {
        let Some((username, password)) = self.service_account.as_ref() else {
            debug!("No service account configured, keeping current session");
            return Ok(());
        };
        self.login(username, password).await?;
        debug!(url = %self.url, "Monitoring session renewed");
        Ok(())
    }

    async fn create_host_group(&self, name: &str) -> Result<String, StepError> {
        let ids: GroupIds = self
            .call("hostgroup.create", json!({ "name": name }), true)
            .await?;
        first_id("hostgroup.create", ids.groupids)
    }

    async fn create_user_group(
        &self,
        name: &str,
        host_group_id: &str,
        permission: u8,
    ) -> Result<String, StepError> {
        let ids: UserGroupIds = self
            .call(
                "usergroup.create",
                json!({
                    "name": name,
                    "hostgroup_rights": [{ "id": host_group_id, "permission": permission }],
                }),
                true,
            )
            .await?;
        first_id("usergroup.create", ids.usrgrpids)
    }

    async fn create_host(&self, request: &HostCreateRequest) -> Result<String, StepError> {
        let ids: HostIds = self
            .call(
                "host.create",
                json!({
                    "host": request.host_name,
                    "interfaces": [request.interface],
                    "groups": [{ "groupid": request.host_group_id }],
                }),
                true,
            )
            .await?;
        first_id("host.create", ids.hostids)
    }

    async fn get_hosts(&self, query: &HostQuery) -> Result<Vec<RemoteHost>, StepError> {
        let params = match query {
            HostQuery::ById(id) => json!({ "output": ["hostid", "host", "name"], "hostids": [id] }),
            HostQuery::ByName(name) => {
                json!({ "output": ["hostid", "host", "name"], "filter": { "host": [name] } })
            }
        };
        self.call("host.get", params, true).await
    }

    async fn get_host_interfaces(&self, remote_host_id: &str) -> Result<Vec<String>, StepError> {
        let interfaces: Vec<RemoteInterface> = self
            .call(
                "hostinterface.get",
                json!({ "output": ["interfaceid"], "hostids": remote_host_id }),
                true,
            )
            .await?;
        Ok(interfaces.into_iter().map(|i| i.interfaceid).collect())
    }

    async fn create_items(
        &self,
        remote_host_id: &str,
        interface_id: &str,
        items: &[ItemSpec],
    ) -> Result<Vec<String>, StepError> {
        let payload: Vec<Value> = items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "key_": item.key,
                    "hostid": remote_host_id,
                    "interfaceid": interface_id,
                    "type": item.item_type,
                    "value_type": item.value_type,
                    "delay": item.delay,
                })
            })
            .collect();
        let ids: ItemIds = self.call("item.create", Value::Array(payload), true).await?;
        require_ids("item.create", ids.itemids)
    }

    async fn delete_hosts(&self, remote_host_ids: &[String]) -> Result<Vec<String>, StepError> {
        let ids: HostIds = self
            .call("host.delete", json!(remote_host_ids), true)
            .await?;
        Ok(ids.hostids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn rpc_error(message: &str, data: Option<&str>) -> RpcErrorBody {
        RpcErrorBody {
            code: -32602,
            message: message.to_string(),
            data: data.map(|d| Value::String(d.to_string())),
        }
    }

    #[test]
    fn test_session_errors_are_auth_invalid() {
        for text in ["Not authorised.", "Session terminated, re-login, please.", "NOT AUTHORIZED"] {
            let err = classify_rpc_error("host.create", &rpc_error("Invalid params.", Some(text)));
            assert_eq!(err.kind(), ErrorKind::AuthInvalid, "{text}");
        }
    }

    #[test]
    fn test_duplicate_host_is_already_exists() {
        let err = classify_rpc_error(
            "host.create",
            &rpc_error("Invalid params.", Some("Host with the same name \"web-01\" already exists.")),
        );
        assert_eq!(err.terminal_reason(), Some(TerminalReason::AlreadyExists));
    }

    #[test]
    fn test_other_rpc_errors_are_rejected() {
        let err = classify_rpc_error("item.create", &rpc_error("Application error.", None));
        assert_eq!(err.terminal_reason(), Some(TerminalReason::Rejected));
    }

    #[test]
    fn test_empty_id_list_is_empty_response() {
        let err = require_ids("item.create", Vec::new()).unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::EmptyResponse));
    }

    #[test]
    fn test_item_spec_defaults() {
        let item: ItemSpec =
            serde_json::from_str(r#"{"name": "CPU", "key": "system.cpu.load"}"#).unwrap();
        assert_eq!(item, ItemSpec::new("CPU", "system.cpu.load"));
    }
}
