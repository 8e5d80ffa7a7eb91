//! Power actions, refine and delete

use anyhow::Result;

use crate::ipc::FleetClient;
use crate::output::{
    format_action_report, format_delete_report, format_vm_deletes, print_error, print_info,
    print_success, print_warning,
};
use mci_core::model::DeleteOption;
use mci_core::VmAction;

/// Apply an action to one VM, or to every VM of the MCI
pub async fn control_command(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    vm: Option<&str>,
    action: VmAction,
) -> Result<()> {
    if let Some(vm) = vm {
        let result = client.control_vm(ns, mci, vm, action).await?;
        match &result.error {
            None => print_success(&format!("{} {}/{}: {}", action, mci, vm, result.status)),
            Some(error) => {
                print_error(&format!("{} {}/{} failed: {}", action, mci, vm, error));
                anyhow::bail!("{} failed on {}", action, vm);
            }
        }
        return Ok(());
    }

    let report = client.control_mci(ns, mci, action).await?;
    println!("{}", format_action_report(&report));
    let failed = report.results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        print_warning(&format!(
            "{} of {} VM(s) did not {}",
            failed,
            report.results.len(),
            action
        ));
    }
    Ok(())
}

pub async fn refine_command(client: &mut FleetClient, ns: &str, mci: &str) -> Result<()> {
    let removed = client.refine_mci(ns, mci).await?;
    if removed.is_empty() {
        print_info(&format!("No failed VMs in {}", mci));
    } else {
        let ids: Vec<String> = removed.iter().map(|id| id.to_string()).collect();
        print_success(&format!("Removed failed VMs: {}", ids.join(", ")));
    }
    Ok(())
}

/// What a delete call targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Vm { mci: String, vm: String },
    Mci(String),
    All,
}

pub async fn delete_command(
    client: &mut FleetClient,
    ns: &str,
    target: DeleteTarget,
    option: DeleteOption,
) -> Result<()> {
    match target {
        DeleteTarget::Vm { mci, vm } => {
            let result = client.delete_vm(ns, &mci, &vm, option).await?;
            println!("{}", format_vm_deletes(std::slice::from_ref(&result)));
            if !result.removed {
                anyhow::bail!("VM {}/{} was not removed", mci, vm);
            }
        }
        DeleteTarget::Mci(mci) => {
            let report = client.delete_mci(ns, &mci, option).await?;
            println!("{}", format_delete_report(&report));
            if !report.mci_removed {
                print_warning("Retry the delete, or pass --force to drop the records anyway");
                anyhow::bail!("MCI {} was not removed", mci);
            }
        }
        DeleteTarget::All => {
            let reports = client.delete_all_mci(ns, option).await?;
            if reports.is_empty() {
                print_info(&format!("No MCIs in {}", ns));
                return Ok(());
            }
            for report in &reports {
                println!("{}", format_delete_report(report));
            }
            let kept = reports.iter().filter(|r| !r.mci_removed).count();
            if kept > 0 {
                anyhow::bail!("{} of {} MCI(s) were not removed", kept, reports.len());
            }
        }
    }
    Ok(())
}
