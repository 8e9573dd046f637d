//! # Agent Deployment
//!
//! Installs the monitoring agent through the configuration runner. The
//! runner is re-invoked inside the step while its report says the install
//! did not succeed; once the inner attempts are used up, a report that names
//! failed tasks with details is terminal and a bare failure is retried at
//! the queue level.

use super::{StepContext, WorkflowStep};
use crate::clients::{RunnerReport, RunnerRequest};
use crate::error::{StepError, TerminalReason};
use crate::models::HostLifecycle;
use crate::orchestration::chain::StepKind;
use crate::orchestration::params::StepParams;
use async_trait::async_trait;
use tracing::{debug, info, warn};

const OPERATION: &str = "agent_deployment";

#[derive(Debug, Clone, Copy, Default)]
pub struct AgentDeployment;

impl AgentDeployment {
    fn interpret(report: &RunnerReport) -> Result<(), StepError> {
        if report.overall_success {
            return Ok(());
        }
        let failed: Vec<&str> = report
            .unsuccessfully_executed_tasks
            .iter()
            .map(|task| task.task.as_str())
            .collect();
        if report.has_failure_details() {
            Err(StepError::terminal(
                OPERATION,
                TerminalReason::AgentInstallFailed,
                format!("runner tasks failed: {}", failed.join(", ")),
            ))
        } else {
            Err(StepError::transient(
                OPERATION,
                "runner reported failure without task details",
            ))
        }
    }
}

#[async_trait]
impl WorkflowStep for AgentDeployment {
    fn kind(&self) -> StepKind {
        StepKind::AgentDeployment
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        lifecycle: &HostLifecycle,
        mut params: StepParams,
    ) -> Result<StepParams, StepError> {
        let network = params.require_network(OPERATION)?;
        let credentials = params.require_credentials(OPERATION)?;
        let target = network.target().ok_or_else(|| {
            StepError::terminal(
                OPERATION,
                TerminalReason::Misconfigured,
                "host has no address for the selected addressing mode",
            )
        })?;

        let request = RunnerRequest {
            target: target.to_string(),
            credentials: credentials.clone(),
            agent_port: ctx.agent.port,
            tags: ctx.agent.tags.clone(),
        };

        let attempts = ctx.retry.inner_attempts();
        let mut attempt = 1;
        let report = loop {
            let outcome = ctx
                .runner
                .run(&request)
                .await
                .and_then(|report| Self::interpret(&report).map(|()| report));

            match outcome {
                Ok(report) => break report,
                // Failed tasks are re-run too until the inner budget is spent
                Err(err) if attempt < attempts => {
                    debug!(
                        lifecycle_id = %lifecycle.id,
                        attempt = attempt,
                        error = %err,
                        "Agent deployment failed, re-running configuration runner"
                    );
                }
                Err(err) => {
                    warn!(
                        lifecycle_id = %lifecycle.id,
                        attempts = attempt,
                        error = %err,
                        "Agent deployment did not succeed"
                    );
                    return Err(err);
                }
            }
            attempt += 1;
            tokio::time::sleep(ctx.retry.inner_delay()).await;
        };

        info!(
            lifecycle_id = %lifecycle.id,
            host_id = params.host_id,
            tasks = report.stats.total,
            "Monitoring agent deployed"
        );
        params.agent_deployed = true;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::FailedTask;
    use crate::error::ErrorKind;
    use crate::test_helpers::{failed_report, success_report, TestHarness};

    #[tokio::test]
    async fn test_successful_report_marks_agent_deployed() {
        let harness = TestHarness::new();
        let (lifecycle, params) = harness.creation_input("web-01", true).await;

        let out = AgentDeployment
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap();
        assert!(out.agent_deployed);
        assert_eq!(harness.runner.runs(), 1);
    }

    #[tokio::test]
    async fn test_failed_tasks_with_details_are_terminal_after_inner_retries() {
        let harness = TestHarness::new();
        harness.runner.always(Ok(failed_report("install agent", "package not found")));
        let (lifecycle, params) = harness.creation_input("web-01", true).await;

        let err = AgentDeployment
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::AgentInstallFailed));
        assert_eq!(harness.runner.runs(), 3);
    }

    #[tokio::test]
    async fn test_failure_without_details_is_transient() {
        let harness = TestHarness::new();
        harness.runner.always(Ok(failed_report("install agent", "")));
        let (lifecycle, params) = harness.creation_input("web-01", true).await;

        let err = AgentDeployment
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_recovers_when_a_later_run_succeeds() {
        let harness = TestHarness::new();
        harness
            .runner
            .push(Err(StepError::transient("configuration_runner", "ssh timeout")));
        harness.runner.push(Ok(success_report()));
        let (lifecycle, params) = harness.creation_input("web-01", true).await;

        let out = AgentDeployment
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap();
        assert!(out.agent_deployed);
        assert_eq!(harness.runner.runs(), 2);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_misconfigured() {
        let harness = TestHarness::new();
        let (lifecycle, params) = harness.creation_input("web-01", false).await;

        let err = AgentDeployment
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::Misconfigured));
        assert_eq!(harness.runner.runs(), 0);
    }

    #[test]
    fn test_interpret_names_failed_tasks() {
        let report = RunnerReport {
            overall_success: false,
            successfully_executed_tasks: vec![],
            unsuccessfully_executed_tasks: vec![FailedTask {
                task: "start service".to_string(),
                details: "unit not found".to_string(),
            }],
            stats: Default::default(),
        };
        let err = AgentDeployment::interpret(&report).unwrap_err();
        assert!(err.to_string().contains("start service"));
    }
}
