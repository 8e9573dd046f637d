// Test Helpers Module - in-memory engine wiring and scripted collaborators
//
// Shared by the unit tests and the integration tests under tests/. Nothing
// here talks to a database or the network.

pub mod fakes;
pub mod harness;

pub use fakes::{
    failed_report, success_report, ScriptedMonitoringApi, ScriptedRunner, SESSION_REFRESH,
};
pub use harness::{test_config, TestHarness, TEST_TEMPLATE};
