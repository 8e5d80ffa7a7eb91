//! Status aggregation
//!
//! A status read polls the provider for every settled VM, folds the answer
//! into the stored record and derives the MCI aggregate from the result.
//! The aggregate itself is never stored.

use mci_core::error::{DriverError, MciError};
use mci_core::model::{Mci, MciStatusInfo, Vm, VmFilter, VmStatusInfo};
use mci_core::types::{MciId, NamespaceId, VmId, VmStatus};

use crate::driver::call_with_timeout;
use crate::provision::DEADLINE_MESSAGE;
use crate::state::OrchestratorState;

#[derive(Clone)]
pub struct StatusService {
    state: OrchestratorState,
}

impl StatusService {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    pub async fn mci_status(
        &self,
        ns: &str,
        mci: &str,
        filter: Option<&VmFilter>,
    ) -> Result<MciStatusInfo, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci = self.state.repo.require_mci(&ns, &MciId::parse(mci)?).await?;
        self.status_of(&ns, &mci, filter).await
    }

    pub async fn list_mci_status(
        &self,
        ns: &str,
        filter: Option<&VmFilter>,
    ) -> Result<Vec<MciStatusInfo>, MciError> {
        let ns = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&ns).await?;
        let mut statuses = Vec::new();
        for mci in self.state.repo.list_mcis(&ns).await? {
            let status = self.status_of(&ns, &mci, filter).await?;
            if filter.is_some() && status.vms.is_empty() {
                continue;
            }
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Refreshed status of a single VM
    pub async fn vm_status(&self, ns: &str, mci: &str, vm: &str) -> Result<VmStatusInfo, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        let vm = self
            .state
            .repo
            .require_vm(&ns, &mci_id, &VmId::parse(vm)?)
            .await?;
        let refreshed = refresh_vm(&self.state, &ns, &mci_id, vm).await;
        Ok(VmStatusInfo::from(&refreshed))
    }

    async fn status_of(
        &self,
        ns: &NamespaceId,
        mci: &Mci,
        filter: Option<&VmFilter>,
    ) -> Result<MciStatusInfo, MciError> {
        let vms = self.state.repo.list_vms(ns, &mci.id).await?;
        let vms = self.refresh(ns, &mci.id, vms).await;
        let infos = vms
            .iter()
            .filter(|vm| filter.map_or(true, |f| f.matches(vm)))
            .map(VmStatusInfo::from)
            .collect();
        Ok(MciStatusInfo::new(mci, infos))
    }

    /// Poll every VM concurrently, bounded by the operation deadline
    pub(crate) async fn refresh(&self, ns: &NamespaceId, mci: &MciId, vms: Vec<Vm>) -> Vec<Vm> {
        let mut fanout = self.state.fan_out();
        for vm in vms.iter().cloned() {
            let state = self.state.clone();
            let ns = ns.clone();
            let mci = mci.clone();
            fanout.spawn(async move { refresh_vm(&state, &ns, &mci, vm).await });
        }

        fanout
            .join(self.state.deadline())
            .await
            .into_iter()
            .zip(vms)
            .map(|(slot, mut stored)| {
                slot.unwrap_or_else(|| {
                    stored.status = VmStatus::Unknown;
                    stored.system_message = Some(DEADLINE_MESSAGE.to_string());
                    stored
                })
            })
            .collect()
    }
}

/// Fold the provider's view of one VM into its record
pub(crate) async fn refresh_vm(
    state: &OrchestratorState,
    ns: &NamespaceId,
    mci: &MciId,
    vm: Vm,
) -> Vm {
    // Creating VMs belong to their provisioning task; terminal ones are final
    if vm.status == VmStatus::Creating || vm.status.is_terminal() {
        return vm;
    }
    let Some(csp_id) = vm.csp_vm_id.clone() else {
        return vm;
    };
    let connection = match state.resolve_connection(&vm.connection_name) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Cannot refresh VM {}: {}", vm.id, e);
            return vm;
        }
    };

    let timeout = state.config.provisioning.driver_timeout;
    let result = call_with_timeout(
        timeout,
        connection.driver.get_instance(&connection.config, &csp_id),
    )
    .await;

    let mut updated = vm.clone();
    match result {
        Ok(info) => {
            let reported = VmStatus::from(info.state);
            // An unsettled provider state keeps the recorded status
            if reported != VmStatus::Unknown {
                updated.status = reported;
            }
            if updated.target_status == Some(updated.status) {
                updated.target_action = None;
                updated.target_status = None;
            }
            if info.public_ip.is_some() {
                updated.public_ip = info.public_ip;
            }
            if info.private_ip.is_some() {
                updated.private_ip = info.private_ip;
            }
        }
        Err(DriverError::NotFound(_)) => {
            if updated.status == VmStatus::Terminating {
                updated.status = VmStatus::Terminated;
                updated.target_action = None;
                updated.target_status = None;
            } else {
                updated.fail("instance no longer exists at the provider");
            }
        }
        Err(e) => {
            tracing::warn!("Status poll for VM {} failed: {}", vm.id, e);
            return vm;
        }
    }

    if updated != vm {
        tracing::debug!("VM {} is now {}", updated.id, updated.status);
        if let Err(e) = state.repo.put_vm(ns, mci, &updated).await {
            tracing::warn!("Failed to record status of VM {}: {}", updated.id, e);
        }
    }
    updated
}
