//! Deletion and cleanup
//!
//! Without `force`, a VM record is only removed once its instance is
//! confirmed gone; a VM whose termination cannot be confirmed stays on
//! record so the instance is never leaked silently. With `force`, records
//! are removed regardless and any termination error is reported alongside.

use mci_core::error::{DriverError, MciError};
use mci_core::model::{DeleteOption, DeleteReport, Vm, VmDeleteResult};
use mci_core::traits::InstanceState;
use mci_core::types::{MciId, NamespaceId, VmAction, VmId, VmStatus};
use tracing::Instrument;

use crate::driver::call_with_timeout;
use crate::provision::DEADLINE_MESSAGE;
use crate::remote::bastion::remove_nodes;
use crate::retry::{Attempt, RetryPolicy};
use crate::state::OrchestratorState;

#[derive(Clone)]
pub struct LifecycleService {
    state: OrchestratorState,
}

impl LifecycleService {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    /// Delete one VM and drop it from its SubGroup and bastion lists
    pub async fn delete_vm(
        &self,
        ns: &str,
        mci: &str,
        vm: &str,
        option: DeleteOption,
    ) -> Result<VmDeleteResult, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        let mut mci = self.state.repo.require_mci(&ns, &mci_id).await?;
        let vm = self
            .state
            .repo
            .require_vm(&ns, &mci_id, &VmId::parse(vm)?)
            .await?;

        let vm_id = vm.id.clone();
        let mut fanout = self.state.fan_out();
        {
            let state = self.state.clone();
            let ns = ns.clone();
            let mci_id = mci_id.clone();
            fanout.spawn(async move { remove_vm(&state, &ns, &mci_id, vm, option).await });
        }
        let result = fanout
            .join(self.state.deadline())
            .await
            .into_iter()
            .next()
            .flatten()
            .unwrap_or_else(|| VmDeleteResult {
                vm_id: vm_id.clone(),
                removed: false,
                error: Some(DEADLINE_MESSAGE.to_string()),
            });

        if result.removed {
            if mci.remove_vm(&vm_id) {
                self.state.repo.put_mci(&ns, &mci).await?;
            }
            remove_nodes(&self.state.repo, &ns, |node| {
                node.mci_id == mci_id && node.vm_id == vm_id
            })
            .await?;
        }
        Ok(result)
    }

    /// Delete every VM of an MCI, then the MCI itself if nothing remains
    pub async fn delete_mci(
        &self,
        ns: &str,
        mci: &str,
        option: DeleteOption,
    ) -> Result<DeleteReport, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        self.delete_mci_by_id(&ns, &mci_id, option).await
    }

    /// Delete every MCI of a namespace, one MCI at a time
    pub async fn delete_all_mci(
        &self,
        ns: &str,
        option: DeleteOption,
    ) -> Result<Vec<DeleteReport>, MciError> {
        let ns = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&ns).await?;
        let mut reports = Vec::new();
        for mci in self.state.repo.list_mcis(&ns).await? {
            reports.push(self.delete_mci_by_id(&ns, &mci.id, option).await?);
        }
        Ok(reports)
    }

    async fn delete_mci_by_id(
        &self,
        ns: &NamespaceId,
        mci_id: &MciId,
        option: DeleteOption,
    ) -> Result<DeleteReport, MciError> {
        let repo = &self.state.repo;
        repo.require_mci(ns, mci_id).await?;
        let vms = repo.list_vms(ns, mci_id).await?;
        tracing::info!(
            "Deleting MCI {}/{} with {} VM(s) (force: {}, terminate: {})",
            ns,
            mci_id,
            vms.len(),
            option.force,
            option.terminate
        );

        let ids: Vec<VmId> = vms.iter().map(|vm| vm.id.clone()).collect();
        let mut fanout = self.state.fan_out();
        for vm in vms {
            let state = self.state.clone();
            let ns = ns.clone();
            let mci_id = mci_id.clone();
            fanout.spawn(async move { remove_vm(&state, &ns, &mci_id, vm, option).await });
        }
        let results: Vec<VmDeleteResult> = fanout
            .join(self.state.deadline())
            .await
            .into_iter()
            .zip(ids)
            .map(|(slot, vm_id)| {
                slot.unwrap_or_else(|| VmDeleteResult {
                    vm_id,
                    removed: false,
                    error: Some(DEADLINE_MESSAGE.to_string()),
                })
            })
            .collect();

        let removed: Vec<&VmId> = results.iter().filter(|r| r.removed).map(|r| &r.vm_id).collect();
        let mci_removed = removed.len() == results.len();
        if mci_removed {
            remove_nodes(repo, ns, |node| &node.mci_id == mci_id).await?;
            repo.delete_mci(ns, mci_id).await?;
            tracing::info!("MCI {}/{} deleted", ns, mci_id);
        } else {
            if let Some(mut mci) = repo.get_mci(ns, mci_id).await? {
                for vm_id in &removed {
                    mci.remove_vm(vm_id);
                }
                repo.put_mci(ns, &mci).await?;
            }
            remove_nodes(repo, ns, |node| {
                &node.mci_id == mci_id && removed.contains(&&node.vm_id)
            })
            .await?;
            tracing::warn!(
                "MCI {}/{} kept: {} of {} VM(s) could not be removed",
                ns,
                mci_id,
                results.len() - removed.len(),
                results.len()
            );
        }

        Ok(DeleteReport {
            mci_id: mci_id.clone(),
            mci_removed,
            results,
        })
    }

    /// Drop the records of failed VMs without calling any driver
    pub async fn refine_mci(&self, ns: &str, mci: &str) -> Result<Vec<VmId>, MciError> {
        let repo = &self.state.repo;
        let ns = NamespaceId::parse(ns)?;
        let mut mci = repo.require_mci(&ns, &MciId::parse(mci)?).await?;

        let mut removed = Vec::new();
        for vm in repo.list_vms(&ns, &mci.id).await? {
            if vm.status != VmStatus::Failed {
                continue;
            }
            repo.delete_vm(&ns, &mci.id, &vm.id).await?;
            mci.remove_vm(&vm.id);
            removed.push(vm.id);
        }

        if !removed.is_empty() {
            repo.put_mci(&ns, &mci).await?;
            let mci_id = mci.id.clone();
            remove_nodes(repo, &ns, |node| {
                node.mci_id == mci_id && removed.contains(&node.vm_id)
            })
            .await?;
            tracing::info!("Refined MCI {}/{}: removed {} failed VM(s)", ns, mci.id, removed.len());
        }
        Ok(removed)
    }
}

/// Terminate (when asked) and remove one VM record
async fn remove_vm(
    state: &OrchestratorState,
    ns: &NamespaceId,
    mci: &MciId,
    vm: Vm,
    option: DeleteOption,
) -> VmDeleteResult {
    let span = tracing::info_span!("delete", mci = %mci, vm = %vm.id);
    remove_vm_inner(state, ns, mci, vm, option)
        .instrument(span)
        .await
}

async fn remove_vm_inner(
    state: &OrchestratorState,
    ns: &NamespaceId,
    mci: &MciId,
    mut vm: Vm,
    option: DeleteOption,
) -> VmDeleteResult {
    let mut note = None;

    let has_instance = vm.csp_vm_id.is_some() && vm.status != VmStatus::Terminated;
    if option.terminate && has_instance {
        match terminate(state, ns, mci, &mut vm, option.force).await {
            Ok(()) => {}
            Err(reason) if option.force => {
                tracing::warn!("Removing record despite termination failure: {}", reason);
                note = Some(reason);
            }
            Err(reason) => {
                tracing::error!("Termination not confirmed, keeping record: {}", reason);
                vm.system_message = Some(reason.clone());
                if let Err(e) = state.repo.put_vm(ns, mci, &vm).await {
                    tracing::warn!("Failed to record VM {}: {}", vm.id, e);
                }
                return VmDeleteResult {
                    vm_id: vm.id,
                    removed: false,
                    error: Some(reason),
                };
            }
        }
    } else if !option.terminate && !option.force && has_instance && !vm.status.is_terminal() {
        return VmDeleteResult {
            error: Some(format!(
                "VM is {}; terminate it first or delete with force",
                vm.status
            )),
            vm_id: vm.id,
            removed: false,
        };
    }

    match state.repo.delete_vm(ns, mci, &vm.id).await {
        Ok(_) => VmDeleteResult {
            vm_id: vm.id,
            removed: true,
            error: note,
        },
        Err(e) => VmDeleteResult {
            vm_id: vm.id,
            removed: false,
            error: Some(e.to_string()),
        },
    }
}

/// Ask the provider to delete the instance and, unless forced, wait until
/// it reports the instance gone
async fn terminate(
    state: &OrchestratorState,
    ns: &NamespaceId,
    mci: &MciId,
    vm: &mut Vm,
    force: bool,
) -> Result<(), String> {
    let Some(csp_id) = vm.csp_vm_id.clone() else {
        return Ok(());
    };
    let connection = state
        .resolve_connection(&vm.connection_name)
        .map_err(|e| e.to_string())?;
    let driver_timeout = state.config.provisioning.driver_timeout;
    let lifecycle = &state.config.lifecycle;

    vm.status = VmStatus::Terminating;
    vm.target_action = Some(VmAction::Terminate);
    vm.target_status = Some(VmStatus::Terminated);
    if let Err(e) = state.repo.put_vm(ns, mci, vm).await {
        tracing::warn!("Failed to record termination of VM {}: {}", vm.id, e);
    }

    let driver = &connection.driver;
    let conn = &connection.config;
    match call_with_timeout(driver_timeout, driver.delete_instance(conn, &csp_id)).await {
        Ok(()) | Err(DriverError::NotFound(_)) => {}
        Err(e) => return Err(format!("terminate failed: {}", e)),
    }

    if !force {
        let csp_id = csp_id.as_str();
        RetryPolicy::new(
            "confirm termination",
            lifecycle.terminate_poll_attempts,
            lifecycle.terminate_poll_interval,
        )
        .run(move |_| async move {
            match call_with_timeout(driver_timeout, driver.get_instance(conn, csp_id)).await {
                Ok(info) if matches!(info.state, InstanceState::Terminated | InstanceState::Failed) => {
                    Attempt::Done(())
                }
                Err(DriverError::NotFound(_)) => Attempt::Done(()),
                Ok(info) => Attempt::Retry(format!("instance is {:?}", info.state)),
                Err(e) => Attempt::Retry(e.to_string()),
            }
        })
        .await
        .map_err(|e| e.to_string())?;
    }

    vm.status = VmStatus::Terminated;
    vm.target_action = None;
    vm.target_status = None;
    Ok(())
}
