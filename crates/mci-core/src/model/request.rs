//! Creation requests and VM templates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::types::validate_id;

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

/// Template for one SubGroup of identical VMs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmTemplate {
    /// SubGroup id; replicas are named `{name}-{index}`
    pub name: String,
    #[serde(default = "one")]
    pub sub_group_size: u32,
    pub connection_name: String,
    pub image_id: String,
    pub spec_id: String,
    pub vnet_id: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub ssh_key_id: String,
    /// Login user; falls back to the SSH key's user
    #[serde(default)]
    pub vm_user_name: Option<String>,
    #[serde(default)]
    pub root_disk_size: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
}

impl VmTemplate {
    /// Check the template is complete. Returns the normalised SubGroup id.
    pub fn validate(&self) -> Result<String, ValidationError> {
        let sub_group = validate_id("subgroup", &self.name)?;
        if self.sub_group_size == 0 {
            return Err(ValidationError::InvalidReplicaCount(0));
        }
        let required = [
            ("connectionName", &self.connection_name),
            ("imageId", &self.image_id),
            ("specId", &self.spec_id),
            ("vnetId", &self.vnet_id),
            ("subnetId", &self.subnet_id),
            ("sshKeyId", &self.ssh_key_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::InvalidTemplate(format!(
                    "SubGroup {}: {} is required",
                    sub_group, field
                )));
            }
        }
        if self.security_group_ids.is_empty() {
            return Err(ValidationError::InvalidTemplate(format!(
                "SubGroup {}: at least one security group is required",
                sub_group
            )));
        }
        Ok(sub_group)
    }
}

/// Request to create an MCI from fully specified templates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MciRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub placement_algo: String,
    #[serde(default = "yes")]
    pub install_agent: bool,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
    pub vm: Vec<VmTemplate>,
}

/// Template resolved against the connection registry at creation time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicVmTemplate {
    pub name: String,
    #[serde(default = "one")]
    pub sub_group_size: u32,
    /// `provider+region+spec`, e.g. `aws+ap-northeast-2+t3.small`
    pub common_spec: String,
    pub common_image: String,
    /// Pin a connection instead of resolving one by provider/region
    #[serde(default)]
    pub connection_name: Option<String>,
    #[serde(default)]
    pub vm_user_name: Option<String>,
    #[serde(default)]
    pub root_disk_size: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
}

impl DynamicVmTemplate {
    /// Split `common_spec` into `(provider, region, spec)`
    pub fn spec_parts(&self) -> Result<(&str, &str, &str), ValidationError> {
        let mut parts = self.common_spec.splitn(3, '+');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(provider), Some(region), Some(spec))
                if !provider.is_empty() && !region.is_empty() && !spec.is_empty() =>
            {
                Ok((provider, region, spec))
            }
            _ => Err(ValidationError::InvalidTemplate(format!(
                "commonSpec '{}' must be provider+region+spec",
                self.common_spec
            ))),
        }
    }
}

/// Request to create an MCI whose templates are resolved dynamically
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MciDynamicRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "yes")]
    pub install_agent: bool,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
    pub vm: Vec<DynamicVmTemplate>,
}
