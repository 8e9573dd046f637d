#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Hostflow Core
//!
//! Host lifecycle orchestration: registering hosts with a remote monitoring
//! backend (optionally deploying its agent first) and removing them again.
//!
//! ## Overview
//!
//! A caller asks for a host to be created or deleted and gets an
//! acknowledgement straight away. The work itself runs as a chain of small
//! steps on a durable queue; every step is retried with backoff, and a
//! workflow ends in exactly one of two places: the success finalizer or the
//! failure compensator. The lifecycle record is the single source of truth for
//! where a host stands.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - orchestrator, chains, steps, retry policy, workers, finalizers
//! - [`state_machine`] - lifecycle states and the legal transitions between them
//! - [`persistence`] - lifecycle, host and task-status stores (Postgres and in-memory)
//! - [`messaging`] - the durable step queue
//! - [`clients`] - monitoring JSON-RPC client and configuration runner
//! - [`models`] - Host, HostLifecycle, TaskStatus
//! - [`database`] - pool construction and migrations
//! - [`config`] - layered TOML + environment configuration
//! - [`error`] - structured errors and failure classification
//! - [`logging`] - tracing setup and structured workflow logs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostflow_core::orchestration::{CreationRequest, TemplateSelection};
//! use hostflow_core::test_helpers::TestHarness;
//!
//! # async fn example() -> hostflow_core::Result<()> {
//! let harness = TestHarness::new();
//! let host = harness.insert_host("web-01").await;
//!
//! let ack = harness
//!     .orchestrator
//!     .start_creation(CreationRequest::new(host.id, TemplateSelection::new(["linux"])))
//!     .await?;
//! harness.drain().await;
//!
//! println!("{:?}", harness.lifecycle(ack.lifecycle_id).await.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests, in-memory stores
//! cargo test          # Unit and integration tests
//! ```

pub mod clients;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod state_machine;
pub mod test_helpers;

pub use config::{ConfigManager, HostflowConfig};
pub use error::{ErrorKind, HostflowError, Result, StepError, TerminalReason};
pub use models::{Host, HostLifecycle, NetworkParams, SshCredentials, TaskStatus};
pub use orchestration::{
    CreationRequest, HostOrchestrator, StepWorker, WorkerPool, WorkflowAck,
};
pub use state_machine::{LifecycleState, WorkflowKind};
