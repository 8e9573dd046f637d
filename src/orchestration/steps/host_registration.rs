//! # Host Registration
//!
//! Creates the host in the monitoring backend and stamps the returned id on
//! the local Host record. A duplicate registration comes back from the
//! backend as "already exists" and is terminal, so re-running the step never
//! produces a second remote host.

use super::{StepContext, WorkflowStep};
use crate::clients::HostCreateRequest;
use crate::error::StepError;
use crate::models::HostLifecycle;
use crate::orchestration::chain::StepKind;
use crate::orchestration::params::StepParams;
use async_trait::async_trait;
use tracing::info;

const OPERATION: &str = "host_registration";

#[derive(Debug, Clone, Copy, Default)]
pub struct HostRegistration;

#[async_trait]
impl WorkflowStep for HostRegistration {
    fn kind(&self) -> StepKind {
        StepKind::HostRegistration
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        lifecycle: &HostLifecycle,
        mut params: StepParams,
    ) -> Result<StepParams, StepError> {
        let request = HostCreateRequest {
            host_name: params.require_host_name(OPERATION)?.to_string(),
            interface: params.require_network(OPERATION)?.interface_descriptor(),
            host_group_id: params.require_host_group(OPERATION)?.to_string(),
        };

        let remote_host_id = ctx
            .retry
            .run_inner(OPERATION, || ctx.monitoring.create_host(&request))
            .await?;

        ctx.hosts
            .set_remote_host_id(params.host_id, &remote_host_id)
            .await?;

        info!(
            lifecycle_id = %lifecycle.id,
            host_id = params.host_id,
            remote_host_id = %remote_host_id,
            "Host registered in monitoring"
        );
        params.remote_host_id = Some(remote_host_id);
        Ok(params)
    }
}
