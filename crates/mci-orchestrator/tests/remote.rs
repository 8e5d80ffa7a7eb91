//! Remote command, file transfer and bastion routing tests

mod common;

use std::time::Duration;

use common::*;
use mci_core::model::{CommandRequest, FileTransferRequest, TargetFilter};
use mci_core::{MciError, RemoteError, SubGroupId, ValidationError, VmId};

async fn quiet_mci(h: &Harness, templates: Vec<mci_core::model::VmTemplate>) {
    let mut req = mci_request("mci01", templates);
    req.install_agent = false;
    h.fleet.provisioner.create_mci(NS, req).await.unwrap();
}

fn commands(cmds: &[&str]) -> CommandRequest {
    CommandRequest {
        user_name: None,
        commands: cmds.iter().map(|c| c.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_one_unreachable_vm_does_not_fail_the_rest() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 3)]).await;
    let broken = h.vm("mci01", "g1-2").await.unwrap().public_ip.unwrap();
    h.shell.make_unreachable(&broken);

    let results = h
        .fleet
        .remote
        .send_command(NS, "mci01", TargetFilter::all(), commands(&["hostname", "uptime"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(!results[1].is_ok());
    assert!(results[1].error.as_deref().unwrap().contains("connection refused"));
    assert!(results[2].is_ok());
    assert_eq!(results[0].outputs.len(), 2);
    assert_eq!(results[0].outputs[1].command, "uptime");
    assert_eq!(results[1].vm_ip.as_deref(), Some(broken.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_vm_times_out_alone() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 3)]).await;
    let stuck = h.vm("mci01", "g1-3").await.unwrap().public_ip.unwrap();
    h.shell.make_hanging(&stuck);

    let command_timeout = h.state().config.remote.command_timeout;
    let started = tokio::time::Instant::now();
    let results = h
        .fleet
        .remote
        .send_command(NS, "mci01", TargetFilter::all(), commands(&["hostname"]))
        .await
        .unwrap();

    assert!(started.elapsed() <= command_timeout + Duration::from_millis(100));
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert_eq!(
        results[2].error.as_deref(),
        Some(RemoteError::Timeout(command_timeout).to_string().as_str())
    );
    assert!(results[2].outputs.is_empty());
}

#[tokio::test]
async fn test_filters_select_targets() {
    let h = harness().await;
    quiet_mci(&h, vec![template("web", 2), template("db", 1)]).await;

    let results = h
        .fleet
        .remote
        .send_command(
            NS,
            "mci01",
            TargetFilter::sub_group(SubGroupId::new("web")),
            commands(&["hostname"]),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.vm_id.as_str().starts_with("web-")));

    let results = h
        .fleet
        .remote
        .send_command(
            NS,
            "mci01",
            TargetFilter::vm(VmId::new("db-1")),
            commands(&["hostname"]),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let err = h
        .fleet
        .remote
        .send_command(
            NS,
            "mci01",
            TargetFilter::sub_group(SubGroupId::new("cache")),
            commands(&["hostname"]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MciError::Validation(ValidationError::SubGroupNotFound { .. })
    ));

    let err = h
        .fleet
        .remote
        .send_command(
            NS,
            "mci01",
            TargetFilter::vm(VmId::new("db-9")),
            commands(&["hostname"]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MciError::Validation(ValidationError::VmNotFound { .. })
    ));
}

#[tokio::test]
async fn test_user_override() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 1)]).await;

    let mut req = commands(&["id"]);
    req.user_name = Some("admin".to_string());
    h.fleet
        .remote
        .send_command(NS, "mci01", TargetFilter::all(), req)
        .await
        .unwrap();

    let calls = h.shell.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].route.target.user, "admin");
    assert_eq!(calls[0].route.target.private_key, "test-private-key");
}

#[tokio::test]
async fn test_empty_commands_rejected() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 1)]).await;

    let err = h
        .fleet
        .remote
        .send_command(NS, "mci01", TargetFilter::all(), commands(&["  ", ""]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MciError::Validation(ValidationError::EmptyCommand)
    ));
    assert!(h.shell.calls().is_empty());
}

#[tokio::test]
async fn test_bastion_routes_through_jump_host() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 3)]).await;

    let bastions = h
        .fleet
        .bastions
        .set_bastion(NS, "mci01", "g1-2", "g1-1")
        .await
        .unwrap();
    assert_eq!(bastions.vnet_id, "vnet01");
    assert_eq!(bastions.nodes.len(), 1);

    let bastion = h.vm("mci01", "g1-1").await.unwrap();
    let target = h.vm("mci01", "g1-3").await.unwrap();
    h.fleet
        .remote
        .send_command(
            NS,
            "mci01",
            TargetFilter::vm(VmId::new("g1-3")),
            commands(&["hostname"]),
        )
        .await
        .unwrap();

    let calls = h.shell.calls();
    assert_eq!(calls.len(), 1);
    let route = &calls[0].route;
    let jump = route.jump.as_ref().unwrap();
    assert_eq!(Some(&jump.host), bastion.public_ip.as_ref());
    assert_eq!(Some(&route.target.host), target.private_ip.as_ref());

    // The bastion itself is reached directly
    h.fleet
        .remote
        .send_command(
            NS,
            "mci01",
            TargetFilter::vm(VmId::new("g1-1")),
            commands(&["hostname"]),
        )
        .await
        .unwrap();
    assert!(h.shell.calls()[1].route.jump.is_none());

    let access = h.fleet.query.access_info(NS, "mci01", None).await.unwrap();
    let vms = &access.sub_groups[0].vms;
    assert_eq!(vms[0].bastion, None);
    assert_eq!(vms[2].bastion.as_ref().map(|b| b.as_str()), Some("g1-1"));
}

#[tokio::test]
async fn test_private_vm_relays_through_public_peer() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 2)]).await;

    let mut private = h.vm("mci01", "g1-2").await.unwrap();
    private.public_ip = None;
    h.state()
        .repo
        .put_vm(&mci_core::NamespaceId::new(NS), &mci_core::MciId::new("mci01"), &private)
        .await
        .unwrap();
    let peer = h.vm("mci01", "g1-1").await.unwrap();

    let results = h
        .fleet
        .remote
        .send_command(
            NS,
            "mci01",
            TargetFilter::vm(VmId::new("g1-2")),
            commands(&["hostname"]),
        )
        .await
        .unwrap();
    assert!(results[0].is_ok());

    let calls = h.shell.calls();
    let route = &calls[0].route;
    assert_eq!(
        route.jump.as_ref().map(|j| &j.host),
        peer.public_ip.as_ref()
    );
    assert_eq!(Some(&route.target.host), private.private_ip.as_ref());
}

#[tokio::test]
async fn test_bastion_removal() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 2)]).await;
    h.fleet
        .bastions
        .set_bastion(NS, "mci01", "g1-2", "g1-1")
        .await
        .unwrap();
    // Setting it twice does not duplicate the node
    let bastions = h
        .fleet
        .bastions
        .set_bastion(NS, "mci01", "g1-2", "g1-1")
        .await
        .unwrap();
    assert_eq!(bastions.nodes.len(), 1);

    let removed = h
        .fleet
        .bastions
        .remove_bastion(NS, "mci01", "g1-1")
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let bastions = h
        .fleet
        .bastions
        .get_bastions(NS, "mci01", "g1-2")
        .await
        .unwrap();
    assert!(bastions.nodes.is_empty());
}

#[tokio::test]
async fn test_file_transfer() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 2)]).await;

    let results = h
        .fleet
        .remote
        .transfer_file(
            NS,
            "mci01",
            TargetFilter::all(),
            FileTransferRequest {
                file_name: "app.conf".to_string(),
                target_path: "/etc/app/".to_string(),
                payload: b"port = 8080\n".to_vec(),
            },
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(results[0].outputs[0].command, "upload /etc/app/app.conf");
    let uploads: Vec<_> = h.shell.calls().into_iter().filter_map(|c| c.upload).collect();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0], ("/etc/app/app.conf".to_string(), 12));
}

#[tokio::test]
async fn test_file_transfer_rejections() {
    let h = harness().await;
    quiet_mci(&h, vec![template("g1", 1)]).await;

    let err = h
        .fleet
        .remote
        .transfer_file(
            NS,
            "mci01",
            TargetFilter::all(),
            FileTransferRequest {
                file_name: "big.bin".to_string(),
                target_path: "/tmp".to_string(),
                payload: vec![0; 2048],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MciError::Validation(ValidationError::PayloadTooLarge {
            size: 2048,
            max: 1024
        })
    ));

    let err = h
        .fleet
        .remote
        .transfer_file(
            NS,
            "mci01",
            TargetFilter::all(),
            FileTransferRequest {
                file_name: "../passwd".to_string(),
                target_path: "/etc".to_string(),
                payload: vec![1],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MciError::Validation(ValidationError::InvalidFileName(_))
    ));
    assert!(h.shell.calls().is_empty());
}
