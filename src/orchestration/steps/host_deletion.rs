//! Removes the host from the monitoring backend. Only acts on a remote id
//! the existence check confirmed earlier in the same chain.

use super::{StepContext, WorkflowStep};
use crate::error::{StepError, TerminalReason};
use crate::models::HostLifecycle;
use crate::orchestration::chain::StepKind;
use crate::orchestration::params::StepParams;
use async_trait::async_trait;
use tracing::info;

const OPERATION: &str = "host_deletion";

#[derive(Debug, Clone, Copy, Default)]
pub struct HostDeletion;

#[async_trait]
impl WorkflowStep for HostDeletion {
    fn kind(&self) -> StepKind {
        StepKind::HostDeletion
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        lifecycle: &HostLifecycle,
        mut params: StepParams,
    ) -> Result<StepParams, StepError> {
        let confirmed = params.confirmed_remote_host_id.clone().ok_or_else(|| {
            StepError::terminal(
                OPERATION,
                TerminalReason::Misconfigured,
                "remote host was not confirmed by an existence check",
            )
        })?;
        let ids = vec![confirmed.clone()];

        let deleted = ctx
            .retry
            .run_inner(OPERATION, || ctx.monitoring.delete_hosts(&ids))
            .await?;

        if !deleted.contains(&confirmed) {
            return Err(StepError::terminal(
                OPERATION,
                TerminalReason::InvalidResponse,
                format!("host.delete did not report {confirmed} as deleted"),
            ));
        }

        info!(
            lifecycle_id = %lifecycle.id,
            host_id = params.host_id,
            remote_host_id = %confirmed,
            "Host removed from monitoring backend"
        );
        params.deleted_remote_host_ids = deleted;
        Ok(params)
    }
}
