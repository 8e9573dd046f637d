//! # Host Existence Check
//!
//! First link of every deletion chain. Looks the host up by remote id when
//! one is known and by name otherwise. "Not found" is terminal: the deletion
//! stops rather than guess which remote host to remove.

use super::{StepContext, WorkflowStep};
use crate::clients::HostQuery;
use crate::error::{StepError, TerminalReason};
use crate::models::HostLifecycle;
use crate::orchestration::chain::StepKind;
use crate::orchestration::params::StepParams;
use async_trait::async_trait;
use tracing::info;

const OPERATION: &str = "host_existence_check";

#[derive(Debug, Clone, Copy, Default)]
pub struct HostExistenceCheck;

impl HostExistenceCheck {
    fn query_for(params: &StepParams) -> Result<HostQuery, StepError> {
        if let Some(remote_host_id) = params.remote_host_id.as_deref() {
            return Ok(HostQuery::ById(remote_host_id.to_string()));
        }
        Ok(HostQuery::ByName(
            params.require_host_name(OPERATION)?.to_string(),
        ))
    }
}

#[async_trait]
impl WorkflowStep for HostExistenceCheck {
    fn kind(&self) -> StepKind {
        StepKind::HostExistenceCheck
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        lifecycle: &HostLifecycle,
        mut params: StepParams,
    ) -> Result<StepParams, StepError> {
        let query = Self::query_for(&params)?;

        let hosts = ctx
            .retry
            .run_inner(OPERATION, || ctx.monitoring.get_hosts(&query))
            .await?;

        let found = hosts
            .into_iter()
            .find(|host| match &query {
                HostQuery::ById(id) => &host.hostid == id,
                HostQuery::ByName(name) => &host.host == name,
            })
            .ok_or_else(|| {
                StepError::terminal(
                    OPERATION,
                    TerminalReason::NotFound,
                    format!("no remote host matches {query:?}"),
                )
            })?;

        info!(
            lifecycle_id = %lifecycle.id,
            host_id = params.host_id,
            remote_host_id = %found.hostid,
            "Remote host confirmed"
        );
        params.confirmed_remote_host_id = Some(found.hostid);
        Ok(params)
    }
}
