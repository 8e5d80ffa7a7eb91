//! Pre-flight resolution and per-VM plans
//!
//! Everything that can reject a request is checked here, before a single
//! record is written or a driver is called.

use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::Rng;

use mci_core::error::{MciError, ValidationError};
use mci_core::model::{SshKey, Vm, VmTemplate};
use mci_core::time::current_time_millis;
use mci_core::traits::InstanceRequest;
use mci_core::types::{MciId, NamespaceId, SshKeyId, SubGroupId, VmId, VmStatus};

use crate::connection::ResolvedConnection;
use crate::state::OrchestratorState;

/// A template with its connection, driver and key looked up
#[derive(Debug, Clone)]
pub(crate) struct ResolvedTemplate {
    pub sub_group_id: SubGroupId,
    pub template: VmTemplate,
    pub connection: ResolvedConnection,
    pub ssh_key: SshKey,
    pub user_name: String,
}

/// One VM to provision
#[derive(Debug, Clone)]
pub(crate) struct VmPlan {
    /// Record as first persisted, in `Creating`
    pub vm: Vm,
    pub request: InstanceRequest,
    pub connection: ResolvedConnection,
    pub ssh_key: SshKey,
}

pub(crate) async fn resolve_template(
    state: &OrchestratorState,
    ns: &NamespaceId,
    template: &VmTemplate,
) -> Result<ResolvedTemplate, MciError> {
    let sub_group_id = SubGroupId::new(template.validate()?);
    let connection = state.resolve_connection(&template.connection_name)?;

    // Keys are stored under their lower-cased id
    let mut template = template.clone();
    template.ssh_key_id = SshKeyId::parse(&template.ssh_key_id)?.to_string();
    let ssh_key = state.repo.require_ssh_key(ns, &template.ssh_key_id).await?;

    let user_name = template
        .vm_user_name
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| Some(ssh_key.user_name.clone()).filter(|u| !u.trim().is_empty()))
        .unwrap_or_else(|| state.config.remote.default_user.clone());

    Ok(ResolvedTemplate {
        sub_group_id,
        template,
        connection,
        ssh_key,
        user_name,
    })
}

/// Reject a call that would add more VMs than one request may fan out to
pub(crate) fn check_request_size(
    state: &OrchestratorState,
    count: u64,
) -> Result<u32, ValidationError> {
    let max = state.config.fanout.max_vms_per_request;
    u32::try_from(count)
        .ok()
        .filter(|count| *count <= max)
        .ok_or(ValidationError::TooManyVms { count, max })
}

/// Random lowercase alphanumeric id
pub(crate) fn new_uid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Plans for replicas `start..start + count` of a SubGroup
pub(crate) fn expand(
    resolved: &ResolvedTemplate,
    mci: &MciId,
    start: u32,
    count: u32,
    ssh_port: u16,
) -> Result<Vec<VmPlan>, ValidationError> {
    let end = start
        .checked_add(count)
        .ok_or(ValidationError::InvalidReplicaCount(i64::from(count)))?;
    let template = &resolved.template;
    let conn = &resolved.connection.config;
    let now = current_time_millis();

    let plans = (start..end)
        .map(|index| {
            let id = VmId::new(format!("{}-{}", resolved.sub_group_id, index));
            let uid = new_uid();

            let mut tags = BTreeMap::new();
            tags.insert("mci".to_string(), mci.to_string());
            tags.insert("subGroup".to_string(), resolved.sub_group_id.to_string());
            tags.insert("uid".to_string(), uid.clone());

            let request = InstanceRequest {
                name: format!("{}-{}", mci, id),
                image_id: template.image_id.clone(),
                spec_id: template.spec_id.clone(),
                vnet_id: template.vnet_id.clone(),
                subnet_id: template.subnet_id.clone(),
                security_group_ids: template.security_group_ids.clone(),
                ssh_key_id: template.ssh_key_id.clone(),
                vm_user_name: resolved.user_name.clone(),
                root_disk_size: template.root_disk_size,
                tags,
            };

            let vm = Vm {
                id,
                uid,
                sub_group_id: resolved.sub_group_id.clone(),
                connection_name: conn.name.clone(),
                provider: conn.provider.clone(),
                region: conn.region.clone(),
                image_id: template.image_id.clone(),
                spec_id: template.spec_id.clone(),
                vnet_id: template.vnet_id.clone(),
                subnet_id: template.subnet_id.clone(),
                security_group_ids: template.security_group_ids.clone(),
                ssh_key_id: template.ssh_key_id.clone(),
                vm_user_name: resolved.user_name.clone(),
                csp_vm_id: None,
                public_ip: None,
                private_ip: None,
                ssh_port,
                status: VmStatus::Creating,
                target_action: None,
                target_status: Some(VmStatus::Running),
                agent_installed: false,
                system_message: None,
                label: template.label.clone(),
                created_at: now,
            };

            VmPlan {
                vm,
                request,
                connection: resolved.connection.clone(),
                ssh_key: resolved.ssh_key.clone(),
            }
        })
        .collect();
    Ok(plans)
}
