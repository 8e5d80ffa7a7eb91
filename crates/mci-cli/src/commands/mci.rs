//! MCI creation, scaling and read commands

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use crate::ipc::{FleetClient, MciOutput};
use crate::output::{
    format_access_info, format_mci, format_mci_status, format_mcis, format_vms, print_success,
    print_warning,
};
use mci_core::model::{MciDynamicRequest, MciInfo, MciRequest, MciView, VmFilter, VmTemplate};
use mci_core::MciStatus;

/// Load a request body from a `.toml` file, or JSON otherwise
pub fn read_request_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {:?}", path))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&content).with_context(|| format!("Invalid TOML request in {:?}", path))
    } else {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON request in {:?}", path))
    }
}

fn report_created(info: &MciInfo, verb: &str) {
    match info.status {
        MciStatus::Running => print_success(&format!("{} MCI {}", verb, info.mci.id)),
        status => print_warning(&format!("{} MCI {} with status {}", verb, info.mci.id, status)),
    }
    println!("{}", format_mci(info, true));
}

/// Create an MCI from a request file.
///
/// A partially failed creation still prints the MCI; the failed VMs carry
/// their reason in the MESSAGE column.
pub async fn create_command(
    client: &mut FleetClient,
    ns: &str,
    file: &Path,
    dynamic: bool,
) -> Result<()> {
    let info = if dynamic {
        let request: MciDynamicRequest = read_request_file(file)?;
        client.create_mci_dynamic(ns, request).await?
    } else {
        let request: MciRequest = read_request_file(file)?;
        client.create_mci(ns, request).await?
    };
    report_created(&info, "Created");
    Ok(())
}

pub async fn add_sub_group_command(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    file: &Path,
) -> Result<()> {
    let template: VmTemplate = read_request_file(file)?;
    let info = client.add_sub_group(ns, mci, template).await?;
    report_created(&info, "Extended");
    Ok(())
}

pub async fn scale_out_command(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    sub_group: &str,
    count: i64,
) -> Result<()> {
    let info = client.scale_out(ns, mci, sub_group, count).await?;
    report_created(&info, "Scaled out");
    Ok(())
}

fn print_output(output: &MciOutput, long: bool) {
    match output {
        MciOutput::Full(mcis) if mcis.len() == 1 => println!("{}", format_mci(&mcis[0], long)),
        MciOutput::Full(mcis) => {
            println!("{}", format_mcis(mcis));
            if long {
                for info in mcis {
                    println!("\n{}", format_mci(info, true));
                }
            }
        }
        MciOutput::Ids(ids) => {
            for id in ids {
                println!("{}", id);
            }
        }
        MciOutput::Status(statuses) => {
            for status in statuses {
                println!("{}\n", format_mci_status(status));
            }
        }
        MciOutput::Access(infos) => {
            for info in infos {
                println!("{}\n", format_access_info(info));
            }
        }
    }
}

pub async fn get_command(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    view: MciView,
    filter: Option<VmFilter>,
    long: bool,
) -> Result<()> {
    let output = client.get_mci(ns, mci, view, filter).await?;
    print_output(&output, long);
    Ok(())
}

pub async fn list_command(
    client: &mut FleetClient,
    ns: &str,
    view: MciView,
    filter: Option<VmFilter>,
    long: bool,
) -> Result<()> {
    let output = client.list_mci(ns, view, filter).await?;
    match &output {
        MciOutput::Full(mcis) if mcis.len() == 1 => println!("{}", format_mcis(mcis)),
        _ => print_output(&output, long),
    }
    Ok(())
}

pub async fn vm_get_command(client: &mut FleetClient, ns: &str, mci: &str, vm: &str) -> Result<()> {
    let vm = client.get_vm(ns, mci, vm).await?;
    println!("{}", format_vms(std::slice::from_ref(&vm), true));
    Ok(())
}

pub async fn vm_list_command(
    client: &mut FleetClient,
    ns: &str,
    mci: &str,
    filter: Option<VmFilter>,
    long: bool,
) -> Result<()> {
    let vms = client.list_vms(ns, mci, filter).await?;
    println!("{}", format_vms(&vms, long));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_toml_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mci.toml");
        std::fs::write(
            &path,
            r#"
            name = "mci01"
            installAgent = false

            [[vm]]
            name = "web"
            subGroupSize = 2
            connectionName = "aws-seoul"
            imageId = "ubuntu22"
            specId = "t3.small"
            vnetId = "vnet01"
            subnetId = "subnet01"
            securityGroupIds = ["sg01"]
            sshKeyId = "key01"
            "#,
        )
        .unwrap();

        let req: MciRequest = read_request_file(&path).unwrap();
        assert_eq!(req.name, "mci01");
        assert!(!req.install_agent);
        assert_eq!(req.vm[0].sub_group_size, 2);
    }

    #[test]
    fn test_read_json_dynamic_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dyn.json");
        std::fs::write(
            &path,
            r#"{"name":"dyn01","vm":[{"name":"g1","commonSpec":"aws+ap-northeast-2+t3.small","commonImage":"ubuntu22"}]}"#,
        )
        .unwrap();

        let req: MciDynamicRequest = read_request_file(&path).unwrap();
        assert!(req.install_agent);
        assert_eq!(req.vm[0].sub_group_size, 1);
    }

    #[test]
    fn test_read_request_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_request_file::<MciRequest>(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
