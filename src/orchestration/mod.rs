//! # Orchestration Engine
//!
//! Durable host-creation and host-deletion workflows.
//!
//! ## Core Components
//!
//! - **HostOrchestrator**: starts a workflow, enters the lifecycle's in-progress
//!   state and enqueues the first link of the chain
//! - **Chains**: ordered step lists per workflow and provisioning kind
//! - **Workflow steps**: agent deployment, host registration, interface
//!   discovery, item provisioning, host existence check, host deletion
//! - **RetryPolicy**: inner retries around remote calls and the outer
//!   re-submit/escalate decision
//! - **StepWorker / WorkerPool**: claim messages, run links, schedule retries
//! - **SuccessFinalizer / FailureCompensator**: the only writers of terminal
//!   lifecycle states
//! - **TaskStatusTracker**: task-status tree for simple-check workflows
//!
//! ## Flow
//!
//! ```text
//! start_creation ──> lifecycle creation_in_progress ──> queue
//!                                                         │
//!   worker: step ─ok─> enqueue next link ─ ... ─> finalize ─> active
//!             │
//!             └─err─> retry with backoff (attempt < max) or compensate ─> creation_failed
//! ```

pub mod chain;
pub mod finalizer;
pub mod item_catalog;
pub mod orchestrator;
pub mod params;
pub mod retry_policy;
pub mod steps;
pub mod task_tracker;
pub mod worker;

pub use chain::{creation_chain, deletion_chain, is_well_formed, ChainLink, ProvisioningKind, StepKind};
pub use finalizer::{CompensationOutcome, FailureCompensator, FinalizationAction, SuccessFinalizer};
pub use item_catalog::{ItemCatalog, StaticItemCatalog, TemplateSelection};
pub use orchestrator::{CreationRequest, HostOrchestrator, WorkflowAck};
pub use params::StepParams;
pub use retry_policy::{RetryDecision, RetryPolicy};
pub use steps::{step_for, AgentSettings, ClientSet, StepContext, StoreSet, WorkflowStep};
pub use task_tracker::TaskStatusTracker;
pub use worker::{ProcessOutcome, StepWorker, WorkerPool, WorkerPoolHandle};
