//! SubGroup scale-out

use mci_core::error::{MciError, ValidationError};
use mci_core::model::MciInfo;
use mci_core::types::{MciId, NamespaceId, SubGroupId};

use crate::provision::{check_request_size, expand, resolve_template, Provisioner};
use crate::state::OrchestratorState;

/// Adds replicas to existing SubGroups
#[derive(Clone)]
pub struct Scaler {
    state: OrchestratorState,
    provisioner: Provisioner,
}

impl Scaler {
    pub fn new(state: OrchestratorState) -> Self {
        Self {
            provisioner: Provisioner::new(state.clone()),
            state,
        }
    }

    /// Add `count` replicas to a SubGroup, using its stored template.
    ///
    /// New replicas continue the SubGroup's numbering; existing members are
    /// left untouched.
    pub async fn scale_out(
        &self,
        ns: &str,
        mci: &str,
        sub_group: &str,
        count: i64,
    ) -> Result<MciInfo, MciError> {
        if count <= 0 {
            return Err(ValidationError::InvalidReplicaCount(count).into());
        }
        let count = check_request_size(&self.state, count.unsigned_abs())?;

        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        let sub_group_id = SubGroupId::parse(sub_group)?;
        let mut mci = self.state.repo.require_mci(&ns, &mci_id).await?;

        let group = mci
            .sub_group(&sub_group_id)
            .ok_or_else(|| ValidationError::SubGroupNotFound {
                mci: mci_id.to_string(),
                sub_group: sub_group_id.to_string(),
            })?;
        let resolved = resolve_template(&self.state, &ns, &group.template).await?;
        let start = group.next_index();
        let target_vm_count = mci
            .target_vm_count
            .checked_add(count)
            .ok_or_else(|| ValidationError::InvalidReplicaCount(i64::from(count)))?;

        let plans = expand(
            &resolved,
            &mci.id,
            start,
            count,
            self.state.config.remote.ssh_port,
        )?;
        if let Some(group) = mci.sub_group_mut(&sub_group_id) {
            group.vm_ids.extend(plans.iter().map(|p| p.vm.id.clone()));
        }
        mci.target_vm_count = target_vm_count;

        tracing::info!(
            "Scaling SubGroup {}/{}/{} out by {} from index {}",
            ns,
            mci.id,
            sub_group_id,
            count,
            start
        );
        self.provisioner.record_plans(&ns, &mci, &plans).await?;
        let vms = self.provisioner.run_plans(&ns, &mci, plans).await;
        self.provisioner.finish(&ns, mci, vms).await
    }
}
