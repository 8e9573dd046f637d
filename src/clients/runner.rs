//! # Configuration Runner Client
//!
//! Runs the external automation tool that installs the monitoring agent on a
//! target machine. The runner is a black box: it gets a one-off JSON
//! inventory file and prints a JSON report of which of its tasks succeeded.
//!
//! Anything that prevents a report from being read (spawn failure, timeout,
//! garbage on stdout) is transient. Interpreting a report that did arrive is
//! left to the Agent Deployment step.

use crate::config::RunnerConfig;
use crate::error::StepError;
use crate::models::SshCredentials;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const OPERATION: &str = "configuration_runner";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerRequest {
    /// IP or DNS name, already chosen by the caller
    pub target: String,
    pub credentials: SshCredentials,
    pub agent_port: u16,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStats {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub successful: u32,
    #[serde(default)]
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerReport {
    pub overall_success: bool,
    #[serde(default)]
    pub successfully_executed_tasks: Vec<String>,
    #[serde(default)]
    pub unsuccessfully_executed_tasks: Vec<FailedTask>,
    #[serde(default)]
    pub stats: RunnerStats,
}

impl RunnerReport {
    /// Whether any failed task came with an explanation
    pub fn has_failure_details(&self) -> bool {
        self.unsuccessfully_executed_tasks
            .iter()
            .any(|task| !task.details.trim().is_empty())
    }
}

#[async_trait]
pub trait ConfigurationRunner: Send + Sync {
    async fn run(&self, request: &RunnerRequest) -> Result<RunnerReport, StepError>;
}

#[derive(Debug, Clone)]
pub struct CommandConfigurationRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandConfigurationRunner {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }

    /// Inventory with a single `monitored` group, in the YAML inventory
    /// layout written as JSON. Credentials are JSON strings and are never
    /// split on whitespace or `=`.
    fn inventory(request: &RunnerRequest) -> serde_json::Value {
        let mut hosts = serde_json::Map::new();
        hosts.insert(
            request.target.clone(),
            json!({
                "ansible_user": request.credentials.username,
                "ansible_password": request.credentials.password,
                "monitoring_agent_port": request.agent_port,
            }),
        );
        json!({ "monitored": { "hosts": hosts } })
    }

    fn write_inventory(request: &RunnerRequest) -> Result<tempfile::NamedTempFile, StepError> {
        let mut file = tempfile::Builder::new()
            .prefix("hostflow-inventory-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| StepError::transient(OPERATION, format!("inventory file: {e}")))?;

        serde_json::to_writer(&mut file, &Self::inventory(request))
            .map_err(std::io::Error::from)
            .and_then(|_| file.flush())
            .map_err(|e| StepError::transient(OPERATION, format!("inventory write: {e}")))?;

        Ok(file)
    }

    /// The report is either the whole stdout or its last JSON line
    fn parse_report(stdout: &str) -> Option<RunnerReport> {
        if let Ok(report) = serde_json::from_str::<RunnerReport>(stdout.trim()) {
            return Some(report);
        }
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str::<RunnerReport>(line).ok())
    }
}

#[async_trait]
impl ConfigurationRunner for CommandConfigurationRunner {
    async fn run(&self, request: &RunnerRequest) -> Result<RunnerReport, StepError> {
        let inventory = Self::write_inventory(request)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("-i")
            .arg(inventory.path());
        if let Some(tags) = request.tags.as_deref() {
            cmd.arg("--tags").arg(tags);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, target = %request.target, "Starting configuration runner");
        let start = Instant::now();

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(StepError::transient(
                    OPERATION,
                    format!("failed to start '{}': {e}", self.program),
                ));
            }
            Err(_) => {
                return Err(StepError::transient(
                    OPERATION,
                    format!("runner timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = Self::parse_report(&stdout);
        debug!(
            exit_code = output.status.code(),
            duration_ms = start.elapsed().as_millis() as u64,
            parsed = report.is_some(),
            "Configuration runner finished"
        );

        report.ok_or_else(|| {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                exit_code = output.status.code(),
                stderr = %stderr.trim(),
                "Configuration runner produced no report"
            );
            StepError::transient(
                OPERATION,
                format!("no parsable report (exit status {:?})", output.status.code()),
            )
        })
    }
}
