//! # Structured Logging Module
//!
//! Environment-aware console logging for the worker process and tests.
//! `RUST_LOG` overrides the environment's default level and
//! `HOSTFLOW_LOG_FORMAT=json` switches to JSON lines.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging; later calls are no-ops
pub fn init_console_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        // Another subscriber may already be installed (tests, embedding apps)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "🔧 LOGGING: console logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("HOSTFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("HOSTFLOW_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Canonical event for workflow-level milestones
pub fn log_workflow_operation(
    operation: &str,
    lifecycle_id: Uuid,
    host_id: i64,
    workflow: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        lifecycle_id = %lifecycle_id,
        host_id = host_id,
        workflow = %workflow,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 WORKFLOW_OPERATION"
    );
}

/// Canonical event for a single step execution
pub fn log_step_operation(
    operation: &str,
    lifecycle_id: Uuid,
    step: &str,
    attempt: u32,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        lifecycle_id = %lifecycle_id,
        step = %step,
        attempt = attempt,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_console_logging();
        init_console_logging();
        log_step_operation("execute", Uuid::new_v4(), "host_registration", 1, "ok", None);
    }
}
