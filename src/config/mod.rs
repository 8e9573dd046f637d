//! # Hostflow Configuration System
//!
//! Typed configuration for the orchestration engine, loaded from
//! `config/hostflow.toml`, an optional `config/hostflow.<env>.toml` overlay and
//! `HOSTFLOW__SECTION__KEY` environment variables.
//!
//! Every section has working defaults, so a missing file section (or a
//! missing file when the caller opts into defaults) still yields a
//! single-node configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hostflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let retry = &manager.config().retry;
//! println!("max attempts: {}", retry.max_attempts);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::clients::ItemSpec;
use crate::constants::defaults;
use crate::orchestration::ProvisioningKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `hostflow.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HostflowConfig {
    pub database: DatabaseConfig,
    pub remote_api: RemoteApiConfig,
    pub runner: RunnerConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub orchestration: OrchestrationConfig,
    /// Named item templates, keyed by template name
    pub templates: BTreeMap<String, TemplateConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the component fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub pool: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            username: "hostflow".to_string(),
            password: "hostflow".to_string(),
            database: "hostflow_development".to_string(),
            pool: 10,
            connect_timeout_seconds: 10,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, honouring `DATABASE_URL` when no explicit url is configured
    pub fn database_url(&self) -> String {
        if let Some(url) = self.url.as_ref().filter(|url| !url.is_empty()) {
            return url.clone();
        }
        if let Ok(env_url) = std::env::var("DATABASE_URL") {
            return env_url;
        }
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Remote monitoring API endpoint and service account
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteApiConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost/api_jsonrpc.php".to_string(),
            username: None,
            password: None,
            timeout_seconds: defaults::REMOTE_TIMEOUT.as_secs(),
        }
    }
}

impl RemoteApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Service account, when both halves are configured
    pub fn login_credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// External configuration runner used for agent deployment
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub program: String,
    /// Arguments placed before the generated `-i <inventory>` pair
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    pub agent_port: u16,
    /// Optional tag filter forwarded as `--tags`
    pub tags: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
            args: vec!["playbooks/monitoring-agent.yml".to_string()],
            timeout_seconds: defaults::RUNNER_TIMEOUT.as_secs(),
            agent_port: defaults::AGENT_PORT,
            tags: None,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Outer (queue-level) and inner (per remote call) retry settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_seconds: u64,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
    pub inner_attempts: u32,
    pub inner_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff_seconds: defaults::BACKOFF.as_secs(),
            backoff_multiplier: 1.0,
            max_backoff_seconds: defaults::MAX_BACKOFF.as_secs(),
            inner_attempts: defaults::INNER_ATTEMPTS,
            inner_delay_ms: defaults::INNER_DELAY.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    Memory,
    #[default]
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub queue_name: String,
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    /// How often a worker pushes the visibility deadline of the message it is
    /// running; 0 turns the heartbeat off
    pub heartbeat_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Postgres,
            queue_name: "host_lifecycle_steps".to_string(),
            visibility_timeout_seconds: defaults::VISIBILITY_TIMEOUT.as_secs(),
            poll_interval_ms: defaults::POLL_INTERVAL.as_millis() as u64,
            heartbeat_interval_ms: defaults::HEARTBEAT_INTERVAL.as_millis() as u64,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    /// Grace period for in-flight steps on shutdown. Workers still running
    /// after it are aborted without acknowledging, so their messages are
    /// redelivered once the visibility timeout lapses.
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: defaults::WORKER_COUNT,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Creation chain used when a request does not pick one
    pub provisioning_kind: ProvisioningKind,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub items: Vec<ItemSpec>,
}

impl HostflowConfig {
    /// Longest a single step attempt can run: every inner attempt hitting the
    /// slower of the two external timeouts, plus the pauses between them
    pub fn worst_case_step_duration(&self) -> Duration {
        let attempts = self.retry.inner_attempts.max(1);
        let call = self.runner.timeout().max(self.remote_api.timeout());
        let pause = Duration::from_millis(self.retry.inner_delay_ms);
        call.saturating_mul(attempts)
            .saturating_add(pause.saturating_mul(attempts - 1))
    }

    /// Validate cross-field constraints after loading
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.url.as_deref().map_or(true, str::is_empty) && self.database.host.is_empty()
        {
            return Err(ConfigurationError::missing_required_field(
                "database.host",
                "database configuration",
            ));
        }

        if self.database.pool == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.pool",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.remote_api.url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "remote_api.url",
                "remote api configuration",
            ));
        }

        if self.remote_api.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "remote_api.timeout_seconds",
                "0",
                "timeout must be greater than 0",
            ));
        }

        if self.runner.program.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "runner.program",
                "runner configuration",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.retry.inner_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.inner_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier.to_string(),
                "multiplier must be at least 1.0",
            ));
        }

        if self.retry.max_backoff_seconds < self.retry.backoff_seconds {
            return Err(ConfigurationError::invalid_value(
                "retry.max_backoff_seconds",
                self.retry.max_backoff_seconds.to_string(),
                "must not be lower than retry.backoff_seconds",
            ));
        }

        if self.queue.queue_name.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "queue.queue_name",
                "queue configuration",
            ));
        }

        if self.queue.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.visibility_timeout_seconds",
                "0",
                "visibility timeout must be greater than 0",
            ));
        }

        match self.queue.heartbeat_interval() {
            Some(heartbeat) => {
                if heartbeat.saturating_mul(2) > self.queue.visibility_timeout() {
                    return Err(ConfigurationError::invalid_value(
                        "queue.heartbeat_interval_ms",
                        self.queue.heartbeat_interval_ms.to_string(),
                        "must be at most half of queue.visibility_timeout_seconds",
                    ));
                }
            }
            None => {
                let worst_case = self.worst_case_step_duration();
                if self.queue.visibility_timeout() < worst_case {
                    return Err(ConfigurationError::invalid_value(
                        "queue.visibility_timeout_seconds",
                        self.queue.visibility_timeout_seconds.to_string(),
                        format!(
                            "without a heartbeat it must cover the longest step ({}s)",
                            worst_case.as_secs()
                        ),
                    ));
                }
            }
        }

        if self.worker.count == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.count",
                "0",
                "at least one worker is required",
            ));
        }

        for (name, template) in &self.templates {
            if template.items.is_empty() {
                return Err(ConfigurationError::validation_error(format!(
                    "template '{name}' defines no items"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HostflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_seconds, 5);
        assert_eq!(config.retry.inner_attempts, 3);
        assert_eq!(config.retry.inner_delay_ms, 2000);
        assert_eq!(config.runner.agent_port, 10050);
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut config = HostflowConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "retry.max_attempts"
        ));
    }

    #[test]
    fn test_validation_rejects_shrinking_backoff() {
        let mut config = HostflowConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_template() {
        let mut config = HostflowConfig::default();
        config
            .templates
            .insert("linux".to_string(), TemplateConfig::default());
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_worst_case_step_duration() {
        let mut config = HostflowConfig::default();
        config.runner.timeout_seconds = 600;
        config.remote_api.timeout_seconds = 15;
        config.retry.inner_attempts = 3;
        config.retry.inner_delay_ms = 2000;
        assert_eq!(config.worst_case_step_duration(), Duration::from_secs(1804));
    }

    #[test]
    fn test_heartbeat_must_fit_twice_in_visibility_timeout() {
        let mut config = HostflowConfig::default();
        config.queue.visibility_timeout_seconds = 60;
        config.queue.heartbeat_interval_ms = 45_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. })
                if field == "queue.heartbeat_interval_ms"
        ));

        config.queue.heartbeat_interval_ms = 30_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_visibility_timeout_covers_longest_step_without_heartbeat() {
        let mut config = HostflowConfig::default();
        config.queue.heartbeat_interval_ms = 0;
        config.queue.visibility_timeout_seconds = 120;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. })
                if field == "queue.visibility_timeout_seconds"
        ));

        config.queue.visibility_timeout_seconds =
            config.worst_case_step_duration().as_secs() + 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_database_url_wins() {
        let database = DatabaseConfig {
            url: Some("postgresql://u:p@db:5432/hf".to_string()),
            ..DatabaseConfig::default()
        };
        assert_eq!(database.database_url(), "postgresql://u:p@db:5432/hf");
    }

    #[test]
    fn test_login_credentials_require_username() {
        let api = RemoteApiConfig {
            username: Some(String::new()),
            password: Some("secret".to_string()),
            ..RemoteApiConfig::default()
        };
        assert!(api.login_credentials().is_none());
    }
}
