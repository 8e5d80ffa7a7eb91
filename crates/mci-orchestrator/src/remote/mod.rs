//! Remote execution over SSH
//!
//! Commands and file uploads fan out to every selected VM. Each VM gets
//! its own result; one unreachable VM never aborts the others.

pub mod bastion;
mod ssh;

pub use bastion::BastionService;
pub use ssh::SshShell;

use std::sync::Arc;

use bytes::Bytes;

use mci_core::error::{MciError, RemoteError, ValidationError};
use mci_core::model::{
    CommandOutput, CommandRequest, CommandResult, FileTransferRequest, Mci, TargetFilter, Vm,
};
use mci_core::traits::{SshEndpoint, SshRoute};
use mci_core::types::{MciId, NamespaceId, SubGroupId, VmId};

use crate::provision::DEADLINE_MESSAGE;
use crate::state::OrchestratorState;

use bastion::{first_usable_bastion, public_peer};

/// What to do on each VM
#[derive(Clone)]
enum Job {
    Commands(Arc<Vec<String>>),
    Upload { payload: Bytes, path: String },
}

#[derive(Clone)]
pub struct RemoteExecutor {
    state: OrchestratorState,
}

impl RemoteExecutor {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    /// Run commands, in order, on every selected VM
    pub async fn send_command(
        &self,
        ns: &str,
        mci: &str,
        filter: TargetFilter,
        request: CommandRequest,
    ) -> Result<Vec<CommandResult>, MciError> {
        let commands: Vec<String> = request
            .commands
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if commands.is_empty() {
            return Err(ValidationError::EmptyCommand.into());
        }

        let ns = NamespaceId::parse(ns)?;
        let mci = self.state.repo.require_mci(&ns, &MciId::parse(mci)?).await?;
        let targets = self.select(&ns, &mci, &filter).await?;
        tracing::info!(
            "Running {} command(s) on {} VM(s) of MCI {}/{}",
            commands.len(),
            targets.len(),
            ns,
            mci.id
        );
        self.execute(
            &ns,
            &mci.id,
            targets,
            request.user_name.as_deref(),
            Job::Commands(Arc::new(commands)),
        )
        .await
    }

    /// Copy a file to every selected VM
    pub async fn transfer_file(
        &self,
        ns: &str,
        mci: &str,
        filter: TargetFilter,
        request: FileTransferRequest,
    ) -> Result<Vec<CommandResult>, MciError> {
        let max = self.state.config.remote.max_file_size;
        if request.payload.len() > max {
            return Err(ValidationError::PayloadTooLarge {
                size: request.payload.len(),
                max,
            }
            .into());
        }
        let name = request.file_name.trim();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(ValidationError::InvalidFileName(request.file_name.clone()).into());
        }

        let ns = NamespaceId::parse(ns)?;
        let mci = self.state.repo.require_mci(&ns, &MciId::parse(mci)?).await?;
        let targets = self.select(&ns, &mci, &filter).await?;
        let path = request.destination();
        tracing::info!(
            "Copying {} byte(s) to {} on {} VM(s) of MCI {}/{}",
            request.payload.len(),
            path,
            targets.len(),
            ns,
            mci.id
        );
        self.execute(
            &ns,
            &mci.id,
            targets,
            None,
            Job::Upload {
                payload: Bytes::from(request.payload),
                path,
            },
        )
        .await
    }

    /// VMs picked by the filter; unknown names are rejected
    async fn select(
        &self,
        ns: &NamespaceId,
        mci: &Mci,
        filter: &TargetFilter,
    ) -> Result<Vec<Vm>, MciError> {
        let vms = self.state.repo.list_vms(ns, &mci.id).await?;
        let sub_group = filter
            .sub_group
            .as_ref()
            .map(|sg| SubGroupId::parse(sg.as_str()))
            .transpose()?;
        let vm_id = filter
            .vm
            .as_ref()
            .map(|vm| VmId::parse(vm.as_str()))
            .transpose()?;

        if let Some(sg) = &sub_group {
            if mci.sub_group(sg).is_none() {
                return Err(ValidationError::SubGroupNotFound {
                    mci: mci.id.to_string(),
                    sub_group: sg.to_string(),
                }
                .into());
            }
        }

        let selected: Vec<Vm> = vms
            .into_iter()
            .filter(|vm| sub_group.as_ref().map_or(true, |sg| &vm.sub_group_id == sg))
            .filter(|vm| vm_id.as_ref().map_or(true, |id| &vm.id == id))
            .collect();

        if let Some(id) = &vm_id {
            if selected.is_empty() {
                return Err(ValidationError::VmNotFound {
                    mci: mci.id.to_string(),
                    vm: id.to_string(),
                }
                .into());
            }
        }
        Ok(selected)
    }

    /// SSH route to a VM, through a bastion when one serves its VNet
    async fn route(
        &self,
        ns: &NamespaceId,
        mci: &MciId,
        vm: &Vm,
        user: Option<&str>,
    ) -> Result<SshRoute, String> {
        let repo = &self.state.repo;
        let key = repo
            .get_ssh_key(ns, &vm.ssh_key_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| ValidationError::SshKeyNotFound(vm.ssh_key_id.clone()).to_string())?;
        let user = user
            .filter(|u| !u.trim().is_empty())
            .map(str::to_string)
            .or_else(|| Some(vm.vm_user_name.clone()).filter(|u| !u.is_empty()))
            .unwrap_or_else(|| self.state.config.remote.default_user.clone());

        let mut bastion = first_usable_bastion(repo, ns, mci, vm)
            .await
            .map_err(|e| e.to_string())?;
        if bastion.is_none() && vm.public_ip.is_none() {
            bastion = public_peer(repo, ns, mci, vm)
                .await
                .map_err(|e| e.to_string())?;
        }
        let Some(bastion) = bastion else {
            let host = vm
                .ssh_address()
                .ok_or_else(|| RemoteError::NoAddress(vm.id.to_string()).to_string())?;
            return Ok(SshRoute::direct(SshEndpoint {
                host: host.to_string(),
                port: vm.ssh_port,
                user,
                private_key: key.private_key,
            }));
        };

        // Behind a bastion the VM is reached on its private address
        let host = vm
            .private_ip
            .clone()
            .or_else(|| vm.public_ip.clone())
            .ok_or_else(|| RemoteError::NoAddress(vm.id.to_string()).to_string())?;
        let bastion_key = repo
            .get_ssh_key(ns, &bastion.ssh_key_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| {
                ValidationError::SshKeyNotFound(bastion.ssh_key_id.clone()).to_string()
            })?;
        let bastion_host = bastion
            .public_ip
            .clone()
            .ok_or_else(|| RemoteError::NoAddress(bastion.id.to_string()).to_string())?;
        tracing::debug!("Routing to VM {} through bastion {}", vm.id, bastion.id);

        Ok(SshRoute::via(
            SshEndpoint {
                host: bastion_host,
                port: bastion.ssh_port,
                user: bastion.vm_user_name.clone(),
                private_key: bastion_key.private_key,
            },
            SshEndpoint {
                host,
                port: vm.ssh_port,
                user,
                private_key: key.private_key,
            },
        ))
    }

    async fn execute(
        &self,
        ns: &NamespaceId,
        mci: &MciId,
        targets: Vec<Vm>,
        user: Option<&str>,
        job: Job,
    ) -> Result<Vec<CommandResult>, MciError> {
        let command_timeout = self.state.config.remote.command_timeout;
        let mut placeholders = Vec::with_capacity(targets.len());
        let mut fanout = self.state.fan_out();

        for vm in &targets {
            let route = self.route(ns, mci, vm, user).await;
            let result = CommandResult {
                mci_id: mci.clone(),
                vm_id: vm.id.clone(),
                vm_ip: vm.ssh_address().map(str::to_string),
                outputs: Vec::new(),
                error: None,
            };
            placeholders.push(result.clone());

            let shell = Arc::clone(&self.state.shell);
            let job = job.clone();
            fanout.spawn(async move {
                let mut result = result;
                let route = match route {
                    Ok(route) => route,
                    Err(e) => {
                        tracing::warn!("VM {} is unreachable: {}", result.vm_id, e);
                        result.error = Some(e);
                        return result;
                    }
                };

                let session = async {
                    match &job {
                        Job::Commands(commands) => shell.run(&route, commands).await,
                        Job::Upload { payload, path } => {
                            let len = payload.len();
                            shell.upload(&route, payload.clone(), path).await?;
                            Ok(vec![CommandOutput {
                                command: format!("upload {}", path),
                                stdout: format!("{} byte(s) written", len),
                                stderr: String::new(),
                                exit_status: Some(0),
                            }])
                        }
                    }
                };
                match tokio::time::timeout(command_timeout, session).await {
                    Ok(Ok(outputs)) => result.outputs = outputs,
                    Ok(Err(e)) => {
                        tracing::warn!("Remote session on VM {} failed: {}", result.vm_id, e);
                        result.error = Some(e.to_string());
                    }
                    Err(_) => {
                        result.error = Some(RemoteError::Timeout(command_timeout).to_string());
                    }
                }
                result
            });
        }

        Ok(fanout
            .join(self.state.deadline())
            .await
            .into_iter()
            .zip(placeholders)
            .map(|(slot, mut placeholder)| {
                slot.unwrap_or_else(|| {
                    placeholder.error = Some(DEADLINE_MESSAGE.to_string());
                    placeholder
                })
            })
            .collect())
    }
}
