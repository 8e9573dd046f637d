//! # Step Parameters
//!
//! The parameter bag handed from one step to the next. Steps only ever add
//! to it: later steps still need the network target and credentials that
//! earlier steps consumed.

use super::item_catalog::TemplateSelection;
use crate::error::{StepError, TerminalReason};
use crate::models::{NetworkParams, SshCredentials};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepParams {
    pub host_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkParams>,
    /// Present only when agent deployment was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SshCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<TemplateSelection>,
    #[serde(default)]
    pub agent_deployed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_ids: Vec<String>,
    /// Remote id the existence check confirmed within this chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_remote_host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_remote_host_ids: Vec<String>,
}

fn missing(operation: &str, field: &str) -> StepError {
    StepError::terminal(
        operation,
        TerminalReason::Misconfigured,
        format!("step parameter '{field}' is missing"),
    )
}

impl StepParams {
    pub fn for_host(host_id: i64) -> Self {
        Self {
            host_id,
            ..Self::default()
        }
    }

    pub fn require_network(&self, operation: &str) -> Result<&NetworkParams, StepError> {
        self.network
            .as_ref()
            .ok_or_else(|| missing(operation, "network"))
    }

    pub fn require_credentials(&self, operation: &str) -> Result<&SshCredentials, StepError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| missing(operation, "credentials"))
    }

    pub fn require_host_name(&self, operation: &str) -> Result<&str, StepError> {
        self.host_name
            .as_deref()
            .ok_or_else(|| missing(operation, "host_name"))
    }

    pub fn require_host_group(&self, operation: &str) -> Result<&str, StepError> {
        self.host_group_id
            .as_deref()
            .ok_or_else(|| missing(operation, "host_group_id"))
    }

    pub fn require_remote_host_id(&self, operation: &str) -> Result<&str, StepError> {
        self.remote_host_id
            .as_deref()
            .ok_or_else(|| missing(operation, "remote_host_id"))
    }

    pub fn require_interface_id(&self, operation: &str) -> Result<&str, StepError> {
        self.interface_id
            .as_deref()
            .ok_or_else(|| missing(operation, "interface_id"))
    }
}
