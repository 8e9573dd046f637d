//! # Item Provisioning
//!
//! Resolves the host's templates to concrete items and creates them on the
//! discovered interface. A create call that returns no item ids is terminal;
//! the remote host id stamped by registration stays in place.

use super::{StepContext, WorkflowStep};
use crate::error::{StepError, TerminalReason};
use crate::models::HostLifecycle;
use crate::orchestration::chain::StepKind;
use crate::orchestration::params::StepParams;
use async_trait::async_trait;
use tracing::info;

const OPERATION: &str = "item_provisioning";

#[derive(Debug, Clone, Copy, Default)]
pub struct ItemProvisioning;

#[async_trait]
impl WorkflowStep for ItemProvisioning {
    fn kind(&self) -> StepKind {
        StepKind::ItemProvisioning
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        lifecycle: &HostLifecycle,
        mut params: StepParams,
    ) -> Result<StepParams, StepError> {
        let remote_host_id = params.require_remote_host_id(OPERATION)?;
        let interface_id = params.require_interface_id(OPERATION)?;

        let selection = params.templates.clone().unwrap_or_default();
        let items = ctx.catalog.resolve(&selection).await?;

        let item_ids = ctx
            .retry
            .run_inner(OPERATION, || {
                ctx.monitoring
                    .create_items(remote_host_id, interface_id, &items)
            })
            .await?;

        if item_ids.is_empty() {
            return Err(StepError::terminal(
                OPERATION,
                TerminalReason::EmptyResponse,
                format!("item.create returned no ids for remote host {remote_host_id}"),
            ));
        }

        info!(
            lifecycle_id = %lifecycle.id,
            remote_host_id = %remote_host_id,
            items = item_ids.len(),
            templates = ?selection.templates,
            "Monitoring items created"
        );
        params.item_ids = item_ids;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::item_catalog::TemplateSelection;
    use crate::test_helpers::TestHarness;

    async fn discovered(harness: &TestHarness) -> (HostLifecycle, StepParams) {
        let (lifecycle, mut params) = harness.creation_input("cache-01", false).await;
        let remote_id = harness.monitoring.register_host("cache-01");
        params.interface_id = harness.monitoring.interfaces_of(&remote_id).first().cloned();
        params.remote_host_id = Some(remote_id);
        (lifecycle, params)
    }

    #[tokio::test]
    async fn test_items_created_for_template() {
        let harness = TestHarness::new();
        let (lifecycle, params) = discovered(&harness).await;

        let out = ItemProvisioning
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap();
        assert!(!out.item_ids.is_empty());
    }

    #[tokio::test]
    async fn test_empty_item_ids_is_terminal() {
        let harness = TestHarness::new();
        harness.monitoring.return_no_item_ids();
        let (lifecycle, params) = discovered(&harness).await;

        let err = ItemProvisioning
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::EmptyResponse));
    }

    #[tokio::test]
    async fn test_unknown_template_is_misconfigured() {
        let harness = TestHarness::new();
        let (lifecycle, mut params) = discovered(&harness).await;
        params.templates = Some(TemplateSelection::new(["mainframe"]));

        let err = ItemProvisioning
            .execute(&harness.context, &lifecycle, params)
            .await
            .unwrap_err();
        assert_eq!(err.terminal_reason(), Some(TerminalReason::Misconfigured));
        assert_eq!(harness.monitoring.calls("item.create"), 0);
    }
}
