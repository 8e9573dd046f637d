//! # Workflow Chains
//!
//! A chain is the ordered list of links one workflow instance walks through.
//! Chains are built once by the orchestrator and travel inside every queued
//! message, so a worker never has to look the workflow definition up.
//!
//! ```text
//! full_items:    [agent_deployment] host_registration interface_discovery item_provisioning finalize
//! simple_check:  [agent_deployment] host_registration finalize
//! deletion:      host_existence_check host_deletion finalize
//! ```

use crate::state_machine::WorkflowKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    AgentDeployment,
    HostRegistration,
    InterfaceDiscovery,
    ItemProvisioning,
    HostExistenceCheck,
    HostDeletion,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentDeployment => "agent_deployment",
            Self::HostRegistration => "host_registration",
            Self::InterfaceDiscovery => "interface_discovery",
            Self::ItemProvisioning => "item_provisioning",
            Self::HostExistenceCheck => "host_existence_check",
            Self::HostDeletion => "host_deletion",
        }
    }

    pub fn workflow(&self) -> WorkflowKind {
        match self {
            Self::HostExistenceCheck | Self::HostDeletion => WorkflowKind::Deletion,
            _ => WorkflowKind::Creation,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One position in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "link", content = "step", rename_all = "snake_case")]
pub enum ChainLink {
    Step(StepKind),
    /// Success finalizer, queued as its own message after the last step
    Finalize,
}

impl ChainLink {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Step(step) => step.name(),
            Self::Finalize => "finalize",
        }
    }
}

/// Which creation chain to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningKind {
    /// Registration plus interface lookup and item provisioning
    #[default]
    FullItems,
    /// Registration only, tracked through task-status records
    SimpleCheck,
}

impl ProvisioningKind {
    pub fn tracks_task_status(&self) -> bool {
        matches!(self, Self::SimpleCheck)
    }
}

pub fn creation_chain(kind: ProvisioningKind, deploy_agent: bool) -> Vec<ChainLink> {
    let mut chain = Vec::with_capacity(5);
    if deploy_agent {
        chain.push(ChainLink::Step(StepKind::AgentDeployment));
    }
    chain.push(ChainLink::Step(StepKind::HostRegistration));
    if kind == ProvisioningKind::FullItems {
        chain.push(ChainLink::Step(StepKind::InterfaceDiscovery));
        chain.push(ChainLink::Step(StepKind::ItemProvisioning));
    }
    chain.push(ChainLink::Finalize);
    chain
}

pub fn deletion_chain() -> Vec<ChainLink> {
    vec![
        ChainLink::Step(StepKind::HostExistenceCheck),
        ChainLink::Step(StepKind::HostDeletion),
        ChainLink::Finalize,
    ]
}

/// Structural check applied to chains arriving off the queue
pub fn is_well_formed(workflow: WorkflowKind, chain: &[ChainLink]) -> bool {
    let Some((last, steps)) = chain.split_last() else {
        return false;
    };
    if *last != ChainLink::Finalize || steps.is_empty() {
        return false;
    }

    let mut existence_checked = false;
    for link in steps {
        let ChainLink::Step(step) = link else {
            return false;
        };
        if step.workflow() != workflow {
            return false;
        }
        match step {
            StepKind::HostExistenceCheck => existence_checked = true,
            StepKind::HostDeletion if !existence_checked => return false,
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_chain_without_credentials() {
        assert_eq!(
            creation_chain(ProvisioningKind::FullItems, false),
            vec![
                ChainLink::Step(StepKind::HostRegistration),
                ChainLink::Step(StepKind::InterfaceDiscovery),
                ChainLink::Step(StepKind::ItemProvisioning),
                ChainLink::Finalize,
            ]
        );
    }

    #[test]
    fn test_creation_chain_prepends_agent_deployment() {
        let chain = creation_chain(ProvisioningKind::SimpleCheck, true);
        assert_eq!(
            chain,
            vec![
                ChainLink::Step(StepKind::AgentDeployment),
                ChainLink::Step(StepKind::HostRegistration),
                ChainLink::Finalize,
            ]
        );
        assert!(is_well_formed(WorkflowKind::Creation, &chain));
    }

    #[test]
    fn test_deletion_requires_existence_check_first() {
        assert!(is_well_formed(WorkflowKind::Deletion, &deletion_chain()));

        let reordered = vec![
            ChainLink::Step(StepKind::HostDeletion),
            ChainLink::Step(StepKind::HostExistenceCheck),
            ChainLink::Finalize,
        ];
        assert!(!is_well_formed(WorkflowKind::Deletion, &reordered));

        let missing_finalize = vec![
            ChainLink::Step(StepKind::HostExistenceCheck),
            ChainLink::Step(StepKind::HostDeletion),
        ];
        assert!(!is_well_formed(WorkflowKind::Deletion, &missing_finalize));
    }

    #[test]
    fn test_mixed_workflow_chain_rejected() {
        let chain = vec![
            ChainLink::Step(StepKind::HostRegistration),
            ChainLink::Step(StepKind::HostDeletion),
            ChainLink::Finalize,
        ];
        assert!(!is_well_formed(WorkflowKind::Creation, &chain));
    }

    #[test]
    fn test_chain_link_serialization() {
        let json = serde_json::to_value(ChainLink::Step(StepKind::HostDeletion)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"link": "step", "step": "host_deletion"})
        );
        let finalize = serde_json::to_value(ChainLink::Finalize).unwrap();
        assert_eq!(finalize, serde_json::json!({"link": "finalize"}));
    }
}
