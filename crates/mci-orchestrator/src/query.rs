//! Read-only views over stored records

use std::collections::HashMap;

use mci_core::error::MciError;
use mci_core::model::{
    Mci, MciAccessInfo, MciInfo, SubGroupAccessInfo, Vm, VmAccessInfo, VmFilter,
};
use mci_core::types::{MciId, NamespaceId, VmId};

use crate::remote::bastion::first_usable_bastion;
use crate::state::OrchestratorState;

#[derive(Clone)]
pub struct QueryService {
    state: OrchestratorState,
}

fn keep(filter: Option<&VmFilter>, vms: Vec<Vm>) -> Vec<Vm> {
    match filter {
        Some(f) => vms.into_iter().filter(|vm| f.matches(vm)).collect(),
        None => vms,
    }
}

impl QueryService {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    /// An MCI with its (optionally filtered) VM records
    pub async fn get_mci(
        &self,
        ns: &str,
        mci: &str,
        filter: Option<&VmFilter>,
    ) -> Result<MciInfo, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci = self.state.repo.require_mci(&ns, &MciId::parse(mci)?).await?;
        let vms = self.state.repo.list_vms(&ns, &mci.id).await?;
        Ok(MciInfo::new(mci, keep(filter, vms)))
    }

    /// Every MCI of a namespace. With a filter, MCIs without a matching VM
    /// are left out.
    pub async fn list_mci(&self, ns: &str, filter: Option<&VmFilter>) -> Result<Vec<MciInfo>, MciError> {
        let ns = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&ns).await?;
        let mut infos = Vec::new();
        for mci in self.state.repo.list_mcis(&ns).await? {
            let vms = keep(filter, self.state.repo.list_vms(&ns, &mci.id).await?);
            if filter.is_some() && vms.is_empty() {
                continue;
            }
            infos.push(MciInfo::new(mci, vms));
        }
        Ok(infos)
    }

    /// Ids of every MCI, or of those with a VM matching `filter`
    pub async fn mci_ids(
        &self,
        ns: &str,
        filter: Option<&VmFilter>,
    ) -> Result<Vec<String>, MciError> {
        Ok(self
            .list_mci(ns, filter)
            .await?
            .into_iter()
            .map(|info| info.mci.id.to_string())
            .collect())
    }

    pub async fn vm_ids(
        &self,
        ns: &str,
        mci: &str,
        filter: Option<&VmFilter>,
    ) -> Result<Vec<String>, MciError> {
        Ok(self
            .list_vms(ns, mci, filter)
            .await?
            .into_iter()
            .map(|vm| vm.id.to_string())
            .collect())
    }

    pub async fn get_vm(&self, ns: &str, mci: &str, vm: &str) -> Result<Vm, MciError> {
        let ns = NamespaceId::parse(ns)?;
        self.state
            .repo
            .require_vm(&ns, &MciId::parse(mci)?, &VmId::parse(vm)?)
            .await
    }

    pub async fn list_vms(
        &self,
        ns: &str,
        mci: &str,
        filter: Option<&VmFilter>,
    ) -> Result<Vec<Vm>, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci = self.state.repo.require_mci(&ns, &MciId::parse(mci)?).await?;
        Ok(keep(filter, self.state.repo.list_vms(&ns, &mci.id).await?))
    }

    pub async fn access_info(
        &self,
        ns: &str,
        mci: &str,
        filter: Option<&VmFilter>,
    ) -> Result<MciAccessInfo, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci = self.state.repo.require_mci(&ns, &MciId::parse(mci)?).await?;
        self.access_info_of(&ns, &mci, filter).await
    }

    pub async fn list_access_info(
        &self,
        ns: &str,
        filter: Option<&VmFilter>,
    ) -> Result<Vec<MciAccessInfo>, MciError> {
        let ns = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&ns).await?;
        let mut infos = Vec::new();
        for mci in self.state.repo.list_mcis(&ns).await? {
            infos.push(self.access_info_of(&ns, &mci, filter).await?);
        }
        Ok(infos)
    }

    async fn access_info_of(
        &self,
        ns: &NamespaceId,
        mci: &Mci,
        filter: Option<&VmFilter>,
    ) -> Result<MciAccessInfo, MciError> {
        let vms = keep(filter, self.state.repo.list_vms(ns, &mci.id).await?);
        let mut by_id: HashMap<VmId, Vm> = vms.into_iter().map(|vm| (vm.id.clone(), vm)).collect();

        let mut sub_groups = Vec::with_capacity(mci.sub_groups.len());
        for group in &mci.sub_groups {
            let mut vms = Vec::new();
            for vm_id in &group.vm_ids {
                let Some(vm) = by_id.remove(vm_id) else {
                    continue;
                };
                let bastion = first_usable_bastion(&self.state.repo, ns, &mci.id, &vm)
                    .await?
                    .map(|b| b.id);
                vms.push(VmAccessInfo {
                    vm_id: vm.id,
                    public_ip: vm.public_ip,
                    private_ip: vm.private_ip,
                    ssh_port: vm.ssh_port,
                    user_name: vm.vm_user_name,
                    ssh_key_id: vm.ssh_key_id,
                    connection_name: vm.connection_name,
                    bastion,
                });
            }
            sub_groups.push(SubGroupAccessInfo {
                sub_group_id: group.id.clone(),
                vms,
            });
        }

        Ok(MciAccessInfo {
            mci_id: mci.id.clone(),
            sub_groups,
        })
    }
}
