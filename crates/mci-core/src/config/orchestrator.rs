//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;
use crate::model::ConnectionConfig;

/// Configuration for the orchestrator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Address the control server listens on
    pub bind_address: String,

    /// Accept control connections from non-loopback peers
    pub allow_remote: bool,

    pub fanout: FanoutConfig,
    pub provisioning: ProvisioningConfig,
    pub remote: RemoteConfig,
    pub lifecycle: LifecycleConfig,
    pub driver: DriverConfig,
    pub store: StoreConfig,

    /// Named connections seeded into the connection registry
    pub connections: BTreeMap<String, ConnectionEntry>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:1323".to_string(),
            allow_remote: false,
            fanout: FanoutConfig::default(),
            provisioning: ProvisioningConfig::default(),
            remote: RemoteConfig::default(),
            lifecycle: LifecycleConfig::default(),
            driver: DriverConfig::default(),
            store: StoreConfig::default(),
            connections: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings that would make fan-out calls unbounded or stuck
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fanout.max_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "fanout.max_parallelism must be at least 1".to_string(),
            ));
        }
        if self.fanout.operation_deadline.is_zero() {
            return Err(ConfigError::Invalid(
                "fanout.operation_deadline must be positive".to_string(),
            ));
        }
        if self.fanout.max_vms_per_request == 0 {
            return Err(ConfigError::Invalid(
                "fanout.max_vms_per_request must be at least 1".to_string(),
            ));
        }
        // A driver call cut off by the deadline leaves its VM unconfirmed
        if self.fanout.operation_deadline < self.provisioning.driver_timeout {
            return Err(ConfigError::Invalid(
                "fanout.operation_deadline must not be shorter than provisioning.driver_timeout"
                    .to_string(),
            ));
        }
        if self.provisioning.running_poll_attempts == 0 || self.provisioning.bootstrap_attempts == 0
        {
            return Err(ConfigError::Invalid(
                "provisioning attempt bounds must be at least 1".to_string(),
            ));
        }
        if self.lifecycle.terminate_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.terminate_poll_attempts must be at least 1".to_string(),
            ));
        }
        if self.remote.max_file_size == 0 {
            return Err(ConfigError::Invalid(
                "remote.max_file_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection records built from the `[connections]` table
    pub fn connection_configs(&self) -> Vec<ConnectionConfig> {
        self.connections
            .iter()
            .map(|(name, entry)| ConnectionConfig {
                name: name.clone(),
                provider: entry.provider.clone(),
                region: entry.region.clone(),
                zone: entry.zone.clone(),
                credential: entry.credential.clone(),
            })
            .collect()
    }
}

/// Bounded worker pool shared by every fan-out call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Maximum per-VM tasks running at once within one call
    pub max_parallelism: usize,

    /// Overall deadline of one orchestration call
    #[serde(with = "duration_secs")]
    pub operation_deadline: Duration,

    /// Most VMs one create, add or scale-out call may add
    pub max_vms_per_request: u32,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 64,
            operation_deadline: Duration::from_secs(30 * 60),
            max_vms_per_request: 1000,
        }
    }
}

/// Per-VM provisioning pipeline bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Delay between "is it running yet" polls
    #[serde(with = "duration_millis")]
    pub running_poll_interval: Duration,

    /// Polls before the VM is declared failed
    pub running_poll_attempts: u32,

    /// Delay between agent bootstrap attempts
    #[serde(with = "duration_millis")]
    pub bootstrap_retry_delay: Duration,

    /// Bootstrap attempts before the VM is declared failed
    pub bootstrap_attempts: u32,

    /// Command that installs the management agent
    pub bootstrap_command: String,

    /// Timeout of a single driver call
    #[serde(with = "duration_secs")]
    pub driver_timeout: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            running_poll_interval: Duration::from_secs(5),
            running_poll_attempts: 60,
            bootstrap_retry_delay: Duration::from_secs(3),
            bootstrap_attempts: 30,
            bootstrap_command: "curl -fsSL https://get.mci-fleet.dev/agent.sh | sudo sh"
                .to_string(),
            driver_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Remote session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// TCP + SSH handshake timeout per hop
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Bound on one VM's whole command or transfer session
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// Largest accepted file payload, in bytes
    pub max_file_size: usize,

    /// Login user when neither the request, the VM nor its key names one
    pub default_user: String,

    pub ssh_port: u16,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            command_timeout: Duration::from_secs(10 * 60),
            max_file_size: 10 * 1024 * 1024,
            default_user: "cb-user".to_string(),
            ssh_port: 22,
        }
    }
}

/// Termination confirmation bounds used by deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    #[serde(with = "duration_millis")]
    pub terminate_poll_interval: Duration,

    pub terminate_poll_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            terminate_poll_interval: Duration::from_secs(5),
            terminate_poll_attempts: 24,
        }
    }
}

/// Cloud driver wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Base URL of the REST driver service; unset disables the HTTP driver
    pub endpoint: Option<String>,

    /// Providers routed to the REST driver service
    pub http_providers: Vec<String>,

    /// Providers served by the in-process simulator
    pub sim_providers: Vec<String>,

    /// HTTP request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            http_providers: vec![
                "aws".to_string(),
                "azure".to_string(),
                "gcp".to_string(),
                "alibaba".to_string(),
            ],
            sim_providers: vec!["sim".to_string()],
            timeout: Duration::from_secs(120),
        }
    }
}

/// Record store backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file; unset keeps records in memory only
    pub path: Option<PathBuf>,
}

/// One `[connections.<name>]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub credential: String,
}
