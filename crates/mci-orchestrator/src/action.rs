//! Power actions on VMs
//!
//! While an action is in flight the VM records its `target_action` and
//! `target_status`; a later status read clears them once the provider
//! reports the target state.

use mci_core::error::{DriverError, MciError, ValidationError};
use mci_core::model::{ActionReport, Vm, VmActionResult};
use mci_core::traits::InstanceAction;
use mci_core::types::{MciId, NamespaceId, VmAction, VmId, VmStatus};

use crate::driver::call_with_timeout;
use crate::provision::DEADLINE_MESSAGE;
use crate::state::OrchestratorState;

#[derive(Clone)]
pub struct ActionService {
    state: OrchestratorState,
}

fn instance_action(action: VmAction) -> Option<InstanceAction> {
    match action {
        VmAction::Suspend => Some(InstanceAction::Suspend),
        VmAction::Resume => Some(InstanceAction::Resume),
        VmAction::Reboot => Some(InstanceAction::Reboot),
        VmAction::Terminate => None,
    }
}

fn illegal(vm: &Vm, action: VmAction) -> ValidationError {
    ValidationError::IllegalTransition {
        vm: vm.id.to_string(),
        action: action.to_string(),
        status: vm.status.to_string(),
    }
}

impl ActionService {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    /// Apply an action to every VM of an MCI.
    ///
    /// VMs whose status does not permit the action get an error result and
    /// are left alone.
    pub async fn control_mci(
        &self,
        ns: &str,
        mci: &str,
        action: VmAction,
    ) -> Result<ActionReport, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci = self.state.repo.require_mci(&ns, &MciId::parse(mci)?).await?;
        let vms = self.state.repo.list_vms(&ns, &mci.id).await?;
        tracing::info!("Applying {} to {} VM(s) of MCI {}/{}", action, vms.len(), ns, mci.id);

        let mut results: Vec<Option<VmActionResult>> = Vec::with_capacity(vms.len());
        let mut spawned = Vec::new();
        let mut fanout = self.state.fan_out();
        for vm in vms {
            if action.permits(vm.status) {
                spawned.push((results.len(), vm.id.clone()));
                results.push(None);
                let state = self.state.clone();
                let ns = ns.clone();
                let mci_id = mci.id.clone();
                fanout.spawn(async move { apply(&state, &ns, &mci_id, vm, action).await });
            } else {
                results.push(Some(VmActionResult {
                    vm_id: vm.id.clone(),
                    status: vm.status,
                    error: Some(illegal(&vm, action).to_string()),
                }));
            }
        }

        let attempted: Vec<usize> = spawned.iter().map(|(index, _)| *index).collect();
        let slots = fanout.join(self.state.deadline()).await;
        for ((index, vm_id), slot) in spawned.into_iter().zip(slots) {
            results[index] = Some(slot.unwrap_or_else(|| VmActionResult {
                vm_id,
                status: VmStatus::Unknown,
                error: Some(DEADLINE_MESSAGE.to_string()),
            }));
        }
        let results: Vec<VmActionResult> = results.into_iter().flatten().collect();

        // VMs skipped for their state are reported, not counted as failures
        let failed_all = !attempted.is_empty()
            && attempted
                .iter()
                .all(|&index| results.get(index).is_some_and(|r| r.error.is_some()));
        if failed_all {
            return Err(MciError::AllVmsFailed {
                mci_id: mci.id.to_string(),
                failures: attempted
                    .iter()
                    .filter_map(|&index| results.get(index))
                    .map(|r| format!("{}: {}", r.vm_id, r.error.as_deref().unwrap_or_default()))
                    .collect(),
            });
        }

        Ok(ActionReport {
            mci_id: mci.id,
            action,
            results,
        })
    }

    /// Apply an action to one VM; an illegal transition is rejected outright
    pub async fn control_vm(
        &self,
        ns: &str,
        mci: &str,
        vm: &str,
        action: VmAction,
    ) -> Result<VmActionResult, MciError> {
        let ns = NamespaceId::parse(ns)?;
        let mci_id = MciId::parse(mci)?;
        let vm = self
            .state
            .repo
            .require_vm(&ns, &mci_id, &VmId::parse(vm)?)
            .await?;
        if !action.permits(vm.status) {
            return Err(illegal(&vm, action).into());
        }

        let vm_id = vm.id.clone();
        let state = self.state.clone();
        let mut fanout = self.state.fan_out();
        fanout.spawn(async move { apply(&state, &ns, &mci_id, vm, action).await });
        let slot = fanout.join(self.state.deadline()).await.into_iter().next().flatten();
        Ok(slot.unwrap_or_else(|| VmActionResult {
            vm_id,
            status: VmStatus::Unknown,
            error: Some(DEADLINE_MESSAGE.to_string()),
        }))
    }
}

async fn apply(
    state: &OrchestratorState,
    ns: &NamespaceId,
    mci: &MciId,
    mut vm: Vm,
    action: VmAction,
) -> VmActionResult {
    let outcome = drive(state, ns, mci, &mut vm, action).await;
    if let Err(reason) = &outcome {
        tracing::error!("{} of VM {} failed: {}", action, vm.id, reason);
        vm.fail(format!("{} failed: {}", action, reason));
    }

    let mut error = outcome.err();
    if let Err(e) = state.repo.put_vm(ns, mci, &vm).await {
        tracing::error!("Failed to record VM {}: {}", vm.id, e);
        error.get_or_insert_with(|| format!("VM record could not be written: {}", e));
    }

    VmActionResult {
        vm_id: vm.id,
        status: vm.status,
        error,
    }
}

async fn drive(
    state: &OrchestratorState,
    ns: &NamespaceId,
    mci: &MciId,
    vm: &mut Vm,
    action: VmAction,
) -> Result<(), String> {
    let Some(csp_id) = vm.csp_vm_id.clone() else {
        if action == VmAction::Terminate {
            // Nothing was ever created at the provider
            vm.status = VmStatus::Terminated;
            vm.target_action = None;
            vm.target_status = None;
            return Ok(());
        }
        return Err("VM has no provider instance".to_string());
    };
    let connection = state
        .resolve_connection(&vm.connection_name)
        .map_err(|e| e.to_string())?;
    let timeout = state.config.provisioning.driver_timeout;

    vm.target_action = Some(action);
    vm.target_status = Some(action.target_status());
    match action {
        VmAction::Terminate => vm.status = VmStatus::Terminating,
        VmAction::Reboot => vm.status = VmStatus::Rebooting,
        VmAction::Suspend | VmAction::Resume => {}
    }
    if let Err(e) = state.repo.put_vm(ns, mci, vm).await {
        tracing::warn!("Failed to record {} of VM {}: {}", action, vm.id, e);
    }

    match instance_action(action) {
        None => {
            match call_with_timeout(
                timeout,
                connection.driver.delete_instance(&connection.config, &csp_id),
            )
            .await
            {
                Ok(()) => Ok(()),
                Err(DriverError::NotFound(_)) => {
                    vm.status = VmStatus::Terminated;
                    vm.target_action = None;
                    vm.target_status = None;
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }
        }
        Some(instance_action) => {
            let reported = call_with_timeout(
                timeout,
                connection
                    .driver
                    .control_instance(&connection.config, &csp_id, instance_action),
            )
            .await
            .map_err(|e| e.to_string())?;

            let reported = VmStatus::from(reported);
            if reported != VmStatus::Unknown {
                vm.status = reported;
            }
            if vm.target_status == Some(vm.status) {
                vm.target_action = None;
                vm.target_status = None;
            }
            Ok(())
        }
    }
}
