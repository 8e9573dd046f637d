//! Looks up the interface the backend created for a newly registered host.

use super::{StepContext, WorkflowStep};
use crate::error::{StepError, TerminalReason};
use crate::models::HostLifecycle;
use crate::orchestration::chain::StepKind;
use crate::orchestration::params::StepParams;
use async_trait::async_trait;
use tracing::debug;

const OPERATION: &str = "interface_discovery";

#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceDiscovery;

#[async_trait]
impl WorkflowStep for InterfaceDiscovery {
    fn kind(&self) -> StepKind {
        StepKind::InterfaceDiscovery
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        lifecycle: &HostLifecycle,
        mut params: StepParams,
    ) -> Result<StepParams, StepError> {
        let remote_host_id = params.require_remote_host_id(OPERATION)?;

        let interfaces = ctx
            .retry
            .run_inner(OPERATION, || ctx.monitoring.get_host_interfaces(remote_host_id))
            .await?;

        // A registered host without interfaces is a data problem, not an outage
        let interface_id = interfaces.into_iter().next().ok_or_else(|| {
            StepError::terminal(
                OPERATION,
                TerminalReason::MissingSubResource,
                format!("remote host {remote_host_id} has no interfaces"),
            )
        })?;

        debug!(
            lifecycle_id = %lifecycle.id,
            remote_host_id = %remote_host_id,
            interface_id = %interface_id,
            "Interface discovered"
        );
        params.interface_id = Some(interface_id);
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestHarness;

    #[tokio::test]
    async fn test_host_without_interfaces_is_terminal() {
        let harness = TestHarness::new();
        let (lifecycle, mut params) = harness.creation_input("app-01", false).await;
        params.remote_host_id = Some(harness.monitoring.register_bare_host("app-01"));

        let err = InterfaceDiscovery
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::MissingSubResource));
    }

    #[tokio::test]
    async fn test_first_interface_is_used() {
        let harness = TestHarness::new();
        let (lifecycle, mut params) = harness.creation_input("app-01", false).await;
        let remote_id = harness.monitoring.register_host("app-01");
        params.remote_host_id = Some(remote_id.clone());

        let out = InterfaceDiscovery
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap();
        assert_eq!(
            out.interface_id,
            harness.monitoring.interfaces_of(&remote_id).first().cloned()
        );
    }

    #[tokio::test]
    async fn test_requires_registration_output() {
        let harness = TestHarness::new();
        let (lifecycle, params) = harness.creation_input("app-01", false).await;

        let err = InterfaceDiscovery
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::Misconfigured));
        assert_eq!(harness.monitoring.calls("hostinterface.get"), 0);
    }
}
