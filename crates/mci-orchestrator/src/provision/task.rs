//! The per-VM provisioning pipeline
//!
//! create instance -> wait until running -> bootstrap agent -> record.
//! A task never fails its siblings: every error ends up as a `Failed`
//! status and a system message on its own VM record.

use std::sync::Arc;

use tracing::Instrument;

use mci_core::config::{ProvisioningConfig, RemoteConfig};
use mci_core::error::{DriverError, RemoteError, TaskError};
use mci_core::model::{SshKey, Vm};
use mci_core::traits::{InstanceInfo, InstanceRequest, InstanceState, RemoteShell, SshEndpoint, SshRoute};
use mci_core::types::{MciId, NamespaceId, VmStatus};

use crate::connection::ResolvedConnection;
use crate::driver::call_with_timeout;
use crate::retry::{Attempt, RetryPolicy};
use crate::store::FleetRepository;

use super::plan::VmPlan;

/// Settings shared by all tasks of one call
pub(crate) struct TaskContext {
    pub repo: FleetRepository,
    pub shell: Arc<dyn RemoteShell>,
    pub provisioning: ProvisioningConfig,
    pub remote: RemoteConfig,
    pub ns: NamespaceId,
    pub mci: MciId,
    pub install_agent: bool,
}

/// Provision one VM and return its final record
pub(crate) async fn run(ctx: Arc<TaskContext>, plan: VmPlan) -> Vm {
    let span = tracing::info_span!("provision", mci = %ctx.mci, vm = %plan.vm.id);
    async move {
        let VmPlan {
            mut vm,
            request,
            connection,
            ssh_key,
        } = plan;

        match provision(&ctx, &mut vm, &request, &connection, &ssh_key).await {
            Ok(()) => {
                vm.status = VmStatus::Running;
                vm.target_status = None;
                vm.system_message = None;
                tracing::info!(
                    "VM is running at {}",
                    vm.ssh_address().unwrap_or("<no address>")
                );
            }
            Err(e) => {
                tracing::error!("Provisioning failed: {}", e);
                vm.fail(e.to_string());
            }
        }

        if let Err(e) = ctx.repo.put_vm(&ctx.ns, &ctx.mci, &vm).await {
            tracing::error!("Failed to record VM: {}", e);
            vm.fail(format!("VM record could not be written: {}", e));
        }
        vm
    }
    .instrument(span)
    .await
}

async fn provision(
    ctx: &TaskContext,
    vm: &mut Vm,
    request: &InstanceRequest,
    connection: &ResolvedConnection,
    ssh_key: &SshKey,
) -> Result<(), TaskError> {
    let timeout = ctx.provisioning.driver_timeout;
    let csp_id = call_with_timeout(
        timeout,
        connection.driver.create_instance(&connection.config, request),
    )
    .await?;
    tracing::debug!("Instance created as {}", csp_id);

    // Record the provider id right away so a later delete can find the instance
    vm.csp_vm_id = Some(csp_id.clone());
    if let Err(e) = ctx.repo.put_vm(&ctx.ns, &ctx.mci, vm).await {
        tracing::warn!("Failed to record provider id {}: {}", csp_id, e);
    }

    let info = wait_until_running(ctx, connection, &csp_id).await?;
    vm.public_ip = info.public_ip;
    vm.private_ip = info.private_ip;
    if let Some(port) = info.ssh_port {
        vm.ssh_port = port;
    }

    if ctx.install_agent {
        bootstrap(ctx, vm, ssh_key).await?;
        vm.agent_installed = true;
    }
    Ok(())
}

async fn wait_until_running(
    ctx: &TaskContext,
    connection: &ResolvedConnection,
    csp_id: &str,
) -> Result<InstanceInfo, TaskError> {
    let policy = RetryPolicy::new(
        "wait for running",
        ctx.provisioning.running_poll_attempts,
        ctx.provisioning.running_poll_interval,
    );
    let timeout = ctx.provisioning.driver_timeout;
    let driver = &connection.driver;
    let conn = &connection.config;

    policy
        .run(move |_| async move {
            match call_with_timeout(timeout, driver.get_instance(conn, csp_id)).await {
                Ok(info) if info.is_ready() => Attempt::Done(info),
                Ok(info)
                    if matches!(
                        info.state,
                        InstanceState::Failed
                            | InstanceState::Terminating
                            | InstanceState::Terminated
                    ) =>
                {
                    Attempt::Fatal(
                        DriverError::Provider(format!("instance entered state {:?}", info.state))
                            .into(),
                    )
                }
                Ok(info) if info.state == InstanceState::Running => {
                    Attempt::Retry("instance is running without an address".to_string())
                }
                Ok(info) => Attempt::Retry(format!("instance is {:?}", info.state)),
                Err(e) => Attempt::Retry(e.to_string()),
            }
        })
        .await
}

async fn bootstrap(ctx: &TaskContext, vm: &Vm, ssh_key: &SshKey) -> Result<(), TaskError> {
    let host = vm
        .ssh_address()
        .ok_or_else(|| RemoteError::NoAddress(vm.id.to_string()))?;
    let route = SshRoute::direct(SshEndpoint {
        host: host.to_string(),
        port: vm.ssh_port,
        user: vm.vm_user_name.clone(),
        private_key: ssh_key.private_key.clone(),
    });
    let commands = vec![ctx.provisioning.bootstrap_command.clone()];
    let command_timeout = ctx.remote.command_timeout;

    let policy = RetryPolicy::new(
        "agent bootstrap",
        ctx.provisioning.bootstrap_attempts,
        ctx.provisioning.bootstrap_retry_delay,
    );
    let shell = &ctx.shell;
    let route = &route;
    let commands = &commands;

    policy
        .run(move |_| async move {
            match tokio::time::timeout(command_timeout, shell.run(route, commands)).await {
                Err(_) => Attempt::Retry(RemoteError::Timeout(command_timeout).to_string()),
                // A key that cannot be decoded will not improve with retries
                Ok(Err(e @ RemoteError::InvalidKey(_))) => Attempt::Fatal(e.into()),
                Ok(Err(e)) => Attempt::Retry(e.to_string()),
                Ok(Ok(outputs)) => match outputs.last() {
                    Some(out) if out.exit_status == Some(0) => Attempt::Done(()),
                    Some(out) => Attempt::Retry(format!(
                        "agent install exited with {}: {}",
                        out.exit_status
                            .map(|code| format!("status {}", code))
                            .unwrap_or_else(|| "no status".to_string()),
                        out.stderr.trim()
                    )),
                    None => Attempt::Retry("agent install produced no result".to_string()),
                },
            }
        })
        .await
}
