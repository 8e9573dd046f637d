//! # External Collaborators
//!
//! Clients for the two systems the workflow steps talk to: the remote
//! monitoring backend and the configuration runner. Steps depend on the
//! traits only, so tests can script either side.

pub mod monitoring;
pub mod runner;

pub use monitoring::{
    HostCreateRequest, HostQuery, ItemSpec, JsonRpcMonitoringClient, MonitoringApi, RemoteHost,
};
pub use runner::{
    CommandConfigurationRunner, ConfigurationRunner, FailedTask, RunnerReport, RunnerRequest,
    RunnerStats,
};
