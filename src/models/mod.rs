//! # Data Models
//!
//! Entities the orchestration engine reads and writes: hosts and their
//! credentials, lifecycle records, and the task-status operation tree.

pub mod host;
pub mod host_lifecycle;
pub mod task_status;

pub use host::{
    Host, HostCredentials, InterfaceDescriptor, NetworkParams, NewHost, SshCredentials,
};
pub use host_lifecycle::HostLifecycle;
pub use task_status::{TaskState, TaskStatus};
