//! # Host Model
//!
//! Inventory entity for a machine or device that should be monitored, plus the
//! optional SSH credentials used to install the monitoring agent on it.
//!
//! Hosts are created by the inventory layer. The orchestration engine only
//! stamps `remote_host_id` after registration and removes the record once a
//! deletion workflow has finished.

use crate::constants::REMOTE_ID_UNSET;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent interface type in the remote monitoring API
pub const INTERFACE_TYPE_AGENT: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    /// Display name, unique across the inventory
    pub host_name: String,
    pub ip: Option<String>,
    pub dns: Option<String>,
    /// Address the monitoring backend connects to: ip when true, dns otherwise
    pub useip: bool,
    pub port: u16,
    pub device_type: String,
    /// Remote identifier of the owning host group
    pub host_group_id: String,
    /// Remote identifier assigned by host registration
    pub remote_host_id: String,
}

impl Host {
    pub fn is_registered(&self) -> bool {
        self.remote_host_id != REMOTE_ID_UNSET && !self.remote_host_id.is_empty()
    }

    pub fn network_params(&self) -> NetworkParams {
        NetworkParams {
            useip: self.useip,
            ip: self.ip.clone(),
            dns: self.dns.clone(),
            port: self.port,
        }
    }
}

/// New Host for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHost {
    pub host_name: String,
    pub ip: Option<String>,
    pub dns: Option<String>,
    pub useip: bool,
    pub port: u16,
    pub device_type: String,
    pub host_group_id: String,
}

/// How the monitoring backend reaches a host.
///
/// `useip` makes `ip` and `dns` mutually exclusive for addressing purposes;
/// the unused field may still be carried but is never used as the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub useip: bool,
    pub ip: Option<String>,
    pub dns: Option<String>,
    pub port: u16,
}

impl NetworkParams {
    /// The address used to reach the host
    pub fn target(&self) -> Option<&str> {
        let field = if self.useip { &self.ip } else { &self.dns };
        field.as_deref().filter(|value| !value.trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.target().is_none() {
            let missing = if self.useip { "ip" } else { "dns" };
            return Err(format!("{missing} is required when useip={}", self.useip));
        }
        if self.port == 0 {
            return Err("port must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Interface descriptor in the shape `host.create` expects
    pub fn interface_descriptor(&self) -> InterfaceDescriptor {
        InterfaceDescriptor {
            interface_type: INTERFACE_TYPE_AGENT,
            main: 1,
            useip: u8::from(self.useip),
            ip: if self.useip {
                self.ip.clone().unwrap_or_default()
            } else {
                String::new()
            },
            dns: if self.useip {
                String::new()
            } else {
                self.dns.clone().unwrap_or_default()
            },
            port: self.port.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    #[serde(rename = "type")]
    pub interface_type: u8,
    pub main: u8,
    pub useip: u8,
    pub ip: String,
    pub dns: String,
    pub port: String,
}

/// SSH username/password used only by agent deployment
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    pub username: String,
    pub password: String,
}

impl SshCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Credentials stored 1:1 with a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    pub host_id: i64,
    #[serde(flatten)]
    pub credentials: SshCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(useip: bool) -> NetworkParams {
        NetworkParams {
            useip,
            ip: Some("10.0.0.5".to_string()),
            dns: Some("web-01.internal".to_string()),
            port: 10050,
        }
    }

    #[test]
    fn test_target_follows_useip() {
        assert_eq!(params(true).target(), Some("10.0.0.5"));
        assert_eq!(params(false).target(), Some("web-01.internal"));
    }

    #[test]
    fn test_interface_descriptor_is_exclusive() {
        let by_ip = params(true).interface_descriptor();
        assert_eq!(by_ip.useip, 1);
        assert_eq!(by_ip.ip, "10.0.0.5");
        assert!(by_ip.dns.is_empty());

        let by_dns = params(false).interface_descriptor();
        assert_eq!(by_dns.useip, 0);
        assert!(by_dns.ip.is_empty());
        assert_eq!(by_dns.dns, "web-01.internal");
        assert_eq!(by_dns.port, "10050");
    }

    #[test]
    fn test_validate_requires_selected_address() {
        let mut p = params(true);
        p.ip = None;
        assert!(p.validate().unwrap_err().contains("ip"));

        let mut p = params(false);
        p.dns = Some("  ".to_string());
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = SshCredentials::new("root", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_interface_descriptor_serializes_type_field() {
        let json = serde_json::to_value(params(true).interface_descriptor()).unwrap();
        assert_eq!(json["type"], 1);
        assert_eq!(json["port"], "10050");
    }
}
