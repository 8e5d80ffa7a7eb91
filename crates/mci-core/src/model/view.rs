//! Read views and per-VM operation reports

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::types::{MciId, MciStatus, StatusCount, SubGroupId, VmAction, VmId, VmStatus};

use super::fleet::{Mci, Vm};

/// Detail level for get/list MCI calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MciView {
    /// Full records with the aggregate computed from stored VM statuses
    #[default]
    Default,
    /// Ids only
    Id,
    /// Freshly polled status
    Status,
    /// Addresses and credentials references for SSH access
    AccessInfo,
}

impl FromStr for MciView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(MciView::Default),
            "id" => Ok(MciView::Id),
            "status" => Ok(MciView::Status),
            "accessinfo" | "access-info" | "access" => Ok(MciView::AccessInfo),
            other => Err(format!("unknown view '{}'", other)),
        }
    }
}

/// An MCI together with its VMs and derived status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MciInfo {
    #[serde(flatten)]
    pub mci: Mci,
    pub status: MciStatus,
    pub status_count: StatusCount,
    pub vms: Vec<Vm>,
}

impl MciInfo {
    /// Assemble the view, deriving the aggregate from the VM records
    pub fn new(mci: Mci, vms: Vec<Vm>) -> Self {
        let status_count: StatusCount = vms.iter().map(|vm| vm.status).collect();
        Self {
            mci,
            status: status_count.aggregate(),
            status_count,
            vms,
        }
    }
}

/// Status of one VM as seen by the status aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmStatusInfo {
    pub id: VmId,
    pub sub_group_id: SubGroupId,
    pub csp_vm_id: Option<String>,
    pub status: VmStatus,
    pub target_action: Option<VmAction>,
    pub target_status: Option<VmStatus>,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub connection_name: String,
    pub system_message: Option<String>,
}

impl From<&Vm> for VmStatusInfo {
    fn from(vm: &Vm) -> Self {
        Self {
            id: vm.id.clone(),
            sub_group_id: vm.sub_group_id.clone(),
            csp_vm_id: vm.csp_vm_id.clone(),
            status: vm.status,
            target_action: vm.target_action,
            target_status: vm.target_status,
            public_ip: vm.public_ip.clone(),
            private_ip: vm.private_ip.clone(),
            connection_name: vm.connection_name.clone(),
            system_message: vm.system_message.clone(),
        }
    }
}

/// Aggregated MCI status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MciStatusInfo {
    pub id: MciId,
    pub name: String,
    pub status: MciStatus,
    pub status_count: StatusCount,
    pub agent_installed: bool,
    pub vms: Vec<VmStatusInfo>,
}

impl MciStatusInfo {
    pub fn new(mci: &Mci, vms: Vec<VmStatusInfo>) -> Self {
        let status_count: StatusCount = vms.iter().map(|vm| vm.status).collect();
        Self {
            id: mci.id.clone(),
            name: mci.name.clone(),
            status: status_count.aggregate(),
            status_count,
            agent_installed: mci.agent_installed,
            vms,
        }
    }
}

/// How to reach one VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmAccessInfo {
    pub vm_id: VmId,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub ssh_port: u16,
    pub user_name: String,
    pub ssh_key_id: String,
    pub connection_name: String,
    /// Bastion VM used to reach this VM, if one is assigned
    pub bastion: Option<VmId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubGroupAccessInfo {
    pub sub_group_id: SubGroupId,
    pub vms: Vec<VmAccessInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MciAccessInfo {
    pub mci_id: MciId,
    pub sub_groups: Vec<SubGroupAccessInfo>,
}

/// Outcome of an action on one VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmActionResult {
    pub vm_id: VmId,
    pub status: VmStatus,
    pub error: Option<String>,
}

/// Outcome of an MCI-scoped action, one entry per targeted VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub mci_id: MciId,
    pub action: VmAction,
    pub results: Vec<VmActionResult>,
}

/// Deletion options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOption {
    /// Remove records without waiting for termination to be confirmed
    #[serde(default)]
    pub force: bool,
    /// Terminate provider instances before removing records
    #[serde(default = "default_terminate")]
    pub terminate: bool,
}

fn default_terminate() -> bool {
    true
}

impl Default for DeleteOption {
    fn default() -> Self {
        Self {
            force: false,
            terminate: true,
        }
    }
}

/// Outcome of deleting one VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDeleteResult {
    pub vm_id: VmId,
    /// Record was removed from the store
    pub removed: bool,
    pub error: Option<String>,
}

/// Outcome of deleting an MCI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub mci_id: MciId,
    pub mci_removed: bool,
    pub results: Vec<VmDeleteResult>,
}

/// Attribute filter `key=value` over VM records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmFilter {
    pub key: String,
    pub value: String,
}

impl VmFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Match against any top-level attribute of the VM record.
    ///
    /// Keys may be given in camelCase or snake_case. List attributes match
    /// when any element equals the value.
    pub fn matches(&self, vm: &Vm) -> bool {
        let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(vm) else {
            return false;
        };
        let key = snake_to_camel(&self.key);
        match fields.get(&key) {
            Some(serde_json::Value::Array(items)) => {
                items.iter().any(|item| value_eq(item, &self.value))
            }
            Some(value) => value_eq(value, &self.value),
            None => false,
        }
    }
}

impl FromStr for VmFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok(VmFilter::new(key.trim(), value.trim()))
            }
            _ => Err(ValidationError::InvalidFilter(s.to_string())),
        }
    }
}

impl fmt::Display for VmFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn value_eq(value: &serde_json::Value, expected: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Null => expected.is_empty(),
        other => other.to_string() == expected,
    }
}
