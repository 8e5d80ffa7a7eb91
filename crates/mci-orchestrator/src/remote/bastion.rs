//! Bastion assignments
//!
//! A bastion is a VM with a public address that relays SSH sessions to
//! VMs on the same VNet that have only a private one. Assignments are kept
//! per VNet, in the order they were made.

use mci_core::error::{MciError, StoreError};
use mci_core::model::{BastionNode, Vm, VnetBastions};
use mci_core::types::{MciId, NamespaceId, VmId};

use crate::state::OrchestratorState;
use crate::store::FleetRepository;

#[derive(Clone)]
pub struct BastionService {
    state: OrchestratorState,
}

impl BastionService {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    /// Make `bastion_vm` a bastion for the VNet of `vm`
    pub async fn set_bastion(
        &self,
        ns: &str,
        mci: &str,
        vm: &str,
        bastion_vm: &str,
    ) -> Result<VnetBastions, MciError> {
        let repo = &self.state.repo;
        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        let target = repo.require_vm(&ns, &mci_id, &VmId::parse(vm)?).await?;
        let bastion = repo
            .require_vm(&ns, &mci_id, &VmId::parse(bastion_vm)?)
            .await?;

        let mut bastions = repo.get_vnet_bastions(&ns, &target.vnet_id).await?;
        let node = BastionNode {
            mci_id,
            vm_id: bastion.id,
        };
        if !bastions.nodes.contains(&node) {
            tracing::info!(
                "VM {}/{} is now a bastion for VNet {}",
                node.mci_id,
                node.vm_id,
                bastions.vnet_id
            );
            bastions.nodes.push(node);
            repo.put_vnet_bastions(&ns, &bastions).await?;
        }
        Ok(bastions)
    }

    /// Bastions serving the VNet of `vm`
    pub async fn get_bastions(&self, ns: &str, mci: &str, vm: &str) -> Result<VnetBastions, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let vm = self
            .state
            .repo
            .require_vm(&ns, &MciId::parse(mci)?, &VmId::parse(vm)?)
            .await?;
        Ok(self.state.repo.get_vnet_bastions(&ns, &vm.vnet_id).await?)
    }

    pub async fn list_bastions(&self, ns: &str) -> Result<Vec<VnetBastions>, MciError> {
        let ns = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&ns).await?;
        Ok(self.state.repo.list_vnet_bastions(&ns).await?)
    }

    /// Remove `bastion_vm` from every VNet it serves; returns the number of
    /// VNets changed
    pub async fn remove_bastion(&self, ns: &str, mci: &str, bastion_vm: &str) -> Result<usize, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        let vm_id = VmId::parse(bastion_vm)?;
        Ok(remove_nodes(&self.state.repo, &ns, |node| {
            node.mci_id == mci_id && node.vm_id == vm_id
        })
        .await?)
    }
}

/// Drop every bastion node matching `remove`; returns the VNets changed
pub(crate) async fn remove_nodes(
    repo: &FleetRepository,
    ns: &NamespaceId,
    remove: impl Fn(&BastionNode) -> bool,
) -> Result<usize, StoreError> {
    let mut changed = 0;
    for mut bastions in repo.list_vnet_bastions(ns).await? {
        let before = bastions.nodes.len();
        bastions.nodes.retain(|node| !remove(node));
        if bastions.nodes.len() != before {
            repo.put_vnet_bastions(ns, &bastions).await?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// First assigned bastion on the VM's VNet that can relay to it: not the
/// VM itself, still on record, not terminal and publicly reachable
pub(crate) async fn first_usable_bastion(
    repo: &FleetRepository,
    ns: &NamespaceId,
    mci: &MciId,
    vm: &Vm,
) -> Result<Option<Vm>, StoreError> {
    let bastions = repo.get_vnet_bastions(ns, &vm.vnet_id).await?;
    for node in bastions.nodes {
        if &node.mci_id == mci && node.vm_id == vm.id {
            continue;
        }
        match repo.get_vm(ns, &node.mci_id, &node.vm_id).await? {
            Some(bastion) if bastion.public_ip.is_some() && !bastion.status.is_terminal() => {
                return Ok(Some(bastion));
            }
            _ => continue,
        }
    }
    Ok(None)
}

/// Relay for a VM with no public address and no assigned bastion: the
/// first live peer of its MCI on the same VNet that has a public address
pub(crate) async fn public_peer(
    repo: &FleetRepository,
    ns: &NamespaceId,
    mci: &MciId,
    vm: &Vm,
) -> Result<Option<Vm>, StoreError> {
    Ok(repo.list_vms(ns, mci).await?.into_iter().find(|peer| {
        peer.id != vm.id
            && peer.vnet_id == vm.vnet_id
            && peer.public_ip.is_some()
            && !peer.status.is_terminal()
    }))
}
