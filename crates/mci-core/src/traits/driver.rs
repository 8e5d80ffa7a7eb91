//! Provider-agnostic cloud driver interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::DriverError;
use crate::model::ConnectionConfig;
use crate::types::VmStatus;

/// Everything a driver needs to create one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRequest {
    /// Provider-side instance name
    pub name: String,
    pub image_id: String,
    pub spec_id: String,
    pub vnet_id: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub ssh_key_id: String,
    pub vm_user_name: String,
    #[serde(default)]
    pub root_disk_size: Option<u32>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Provider-reported instance state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    Creating,
    Running,
    Suspending,
    Suspended,
    Resuming,
    Rebooting,
    Terminating,
    Terminated,
    Failed,
    Undefined,
}

impl From<InstanceState> for VmStatus {
    fn from(state: InstanceState) -> Self {
        match state {
            InstanceState::Creating => VmStatus::Creating,
            InstanceState::Running => VmStatus::Running,
            InstanceState::Suspended => VmStatus::Suspended,
            // Suspend/resume in flight: the provider has not settled yet
            InstanceState::Suspending | InstanceState::Resuming | InstanceState::Undefined => {
                VmStatus::Unknown
            }
            InstanceState::Rebooting => VmStatus::Rebooting,
            InstanceState::Terminating => VmStatus::Terminating,
            InstanceState::Terminated => VmStatus::Terminated,
            InstanceState::Failed => VmStatus::Failed,
        }
    }
}

/// Instance description returned by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub csp_id: String,
    pub state: InstanceState,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
}

impl InstanceInfo {
    /// Running with at least one address assigned
    pub fn is_ready(&self) -> bool {
        self.state == InstanceState::Running
            && (self.public_ip.is_some() || self.private_ip.is_some())
    }
}

/// Power actions a driver can apply to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceAction {
    Suspend,
    Resume,
    Reboot,
}

impl InstanceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceAction::Suspend => "suspend",
            InstanceAction::Resume => "resume",
            InstanceAction::Reboot => "reboot",
        }
    }
}

/// One implementation per provider, resolved by provider name.
///
/// All calls are scoped to a connection. Implementations must not block
/// indefinitely; callers still wrap every call in a timeout.
#[async_trait]
pub trait CloudDriver: Send + Sync {
    /// Provider name this driver serves (e.g. `aws`)
    fn provider(&self) -> &str;

    /// Create an instance and return its provider id
    async fn create_instance(
        &self,
        conn: &ConnectionConfig,
        req: &InstanceRequest,
    ) -> Result<String, DriverError>;

    /// Describe an instance
    async fn get_instance(
        &self,
        conn: &ConnectionConfig,
        csp_id: &str,
    ) -> Result<InstanceInfo, DriverError>;

    /// Delete an instance. `NotFound` means it is already gone.
    async fn delete_instance(&self, conn: &ConnectionConfig, csp_id: &str)
        -> Result<(), DriverError>;

    /// Apply a power action and return the state the provider reports
    async fn control_instance(
        &self,
        conn: &ConnectionConfig,
        csp_id: &str,
        action: InstanceAction,
    ) -> Result<InstanceState, DriverError>;

    /// Public address of an instance, if any
    async fn get_public_ip(
        &self,
        conn: &ConnectionConfig,
        csp_id: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(self.get_instance(conn, csp_id).await?.public_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_address() {
        let mut info = InstanceInfo {
            csp_id: "i-1".to_string(),
            state: InstanceState::Running,
            public_ip: None,
            private_ip: None,
            ssh_port: None,
        };
        assert!(!info.is_ready());
        info.private_ip = Some("10.0.0.4".to_string());
        assert!(info.is_ready());
        info.state = InstanceState::Creating;
        assert!(!info.is_ready());
    }

    #[test]
    fn test_state_maps_to_vm_status() {
        assert_eq!(VmStatus::from(InstanceState::Running), VmStatus::Running);
        assert_eq!(VmStatus::from(InstanceState::Suspending), VmStatus::Unknown);
        assert_eq!(VmStatus::from(InstanceState::Terminated), VmStatus::Terminated);
    }
}
