//! Remote command, file copy and bastion commands

use std::path::Path;

use anyhow::{Context, Result};

use crate::ipc::FleetClient;
use crate::output::{format_bastions, format_command_results, print_success, print_warning};
use mci_core::model::{CommandRequest, CommandResult, FileTransferRequest, TargetFilter};
use mci_core::{SubGroupId, VmId};

/// Target selection flags shared by `cmd` and `copy`
#[derive(Debug, Clone, Default)]
pub struct Targets {
    pub sub_group: Option<String>,
    pub vm: Option<String>,
}

impl Targets {
    fn filter(&self) -> Result<TargetFilter> {
        Ok(TargetFilter {
            sub_group: self
                .sub_group
                .as_deref()
                .map(SubGroupId::parse)
                .transpose()?,
            vm: self.vm.as_deref().map(VmId::parse).transpose()?,
        })
    }
}

fn finish(results: &[CommandResult]) -> Result<()> {
    println!("{}", format_command_results(results));
    let failed = results.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        print_warning(&format!("{} of {} VM(s) failed", failed, results.len()));
        anyhow::bail!("remote execution failed on {} VM(s)", failed);
    }
    Ok(())
}

/// Run commands, in order, on every selected VM
pub async fn cmd_command(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    targets: &Targets,
    user_name: Option<String>,
    commands: Vec<String>,
) -> Result<()> {
    let request = CommandRequest {
        user_name,
        commands,
    };
    let results = client
        .send_command(ns, mci, targets.filter()?, request)
        .await?;
    finish(&results)
}

/// Copy a local file into `target_path` on every selected VM
pub async fn copy_command(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    targets: &Targets,
    file: &Path,
    target_path: &str,
) -> Result<()> {
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {:?}", file))?
        .to_string();
    let payload = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;

    let request = FileTransferRequest {
        file_name,
        target_path: target_path.to_string(),
        payload,
    };
    let results = client
        .transfer_file(ns, mci, targets.filter()?, request)
        .await?;
    finish(&results)
}

pub async fn bastion_set(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    vm: &str,
    bastion_vm: &str,
) -> Result<()> {
    let bastions = client.set_bastion(ns, mci, vm, bastion_vm).await?;
    print_success(&format!(
        "{} now serves VNet {}",
        bastion_vm, bastions.vnet_id
    ));
    println!("{}", format_bastions(std::slice::from_ref(&bastions)));
    Ok(())
}

pub async fn bastion_get(client: &mut FleetClient, ns: &str, mci: &str, vm: &str) -> Result<()> {
    let bastions = client.get_bastions(ns, mci, vm).await?;
    println!("{}", format_bastions(std::slice::from_ref(&bastions)));
    Ok(())
}

pub async fn bastion_list(client: &mut FleetClient, ns: &str) -> Result<()> {
    let vnets = client.list_bastions(ns).await?;
    println!("{}", format_bastions(&vnets));
    Ok(())
}

pub async fn bastion_remove(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    bastion_vm: &str,
) -> Result<()> {
    client.remove_bastion(ns, mci, bastion_vm).await?;
    print_success(&format!("{} is no longer a bastion", bastion_vm));
    Ok(())
}
