//! Power actions, status refresh and deletion

mod common;

use std::time::Duration;

use common::*;
use mci_core::model::{DeleteOption, VmFilter};
use mci_core::traits::InstanceState;
use mci_core::{MciError, MciStatus, ValidationError, VmAction, VmStatus};
use mci_orchestrator::driver::Fault;

async fn running_mci(h: &Harness, size: u32) {
    h.fleet
        .provisioner
        .create_mci(NS, mci_request("mci01", vec![template("g1", size)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_suspend_and_resume_mci() {
    let h = harness().await;
    running_mci(&h, 2).await;

    let report = h
        .fleet
        .actions
        .control_mci(NS, "mci01", VmAction::Suspend)
        .await
        .unwrap();
    assert!(report
        .results
        .iter()
        .all(|r| r.error.is_none() && r.status == VmStatus::Suspended));
    let status = h.fleet.status.mci_status(NS, "mci01", None).await.unwrap();
    assert_eq!(status.status, MciStatus::Suspended);

    let report = h
        .fleet
        .actions
        .control_mci(NS, "mci01", VmAction::Resume)
        .await
        .unwrap();
    assert!(report.results.iter().all(|r| r.status == VmStatus::Running));
    let vm = h.vm("mci01", "g1-1").await.unwrap();
    assert_eq!(vm.status, VmStatus::Running);
    assert!(vm.target_action.is_none());
    assert!(vm.target_status.is_none());
}

#[tokio::test]
async fn test_illegal_transition() {
    let h = harness().await;
    running_mci(&h, 2).await;

    let err = h
        .fleet
        .actions
        .control_vm(NS, "mci01", "g1-1", VmAction::Resume)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MciError::Validation(ValidationError::IllegalTransition { .. })
    ));

    // No VM can resume: each one is reported and the driver is never called
    let report = h
        .fleet
        .actions
        .control_mci(NS, "mci01", VmAction::Resume)
        .await
        .unwrap();
    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(result.status, VmStatus::Running);
        assert!(result.error.as_deref().unwrap().contains("Cannot resume"));
    }
    assert_eq!(h.driver.control_calls(), 0);
}

#[tokio::test]
async fn test_mixed_states_skip_ineligible_vms() {
    let h = harness().await;
    running_mci(&h, 2).await;
    h.fleet
        .actions
        .control_vm(NS, "mci01", "g1-1", VmAction::Suspend)
        .await
        .unwrap();

    let report = h
        .fleet
        .actions
        .control_mci(NS, "mci01", VmAction::Suspend)
        .await
        .unwrap();
    assert!(report.results[0].error.is_some());
    assert_eq!(report.results[1].status, VmStatus::Suspended);
}

#[tokio::test]
async fn test_reboot_settles_on_refresh() {
    let h = harness().await;
    running_mci(&h, 1).await;

    let result = h
        .fleet
        .actions
        .control_vm(NS, "mci01", "g1-1", VmAction::Reboot)
        .await
        .unwrap();
    assert_eq!(result.status, VmStatus::Rebooting);
    let vm = h.vm("mci01", "g1-1").await.unwrap();
    assert_eq!(vm.target_status, Some(VmStatus::Running));

    let status = h.fleet.status.vm_status(NS, "mci01", "g1-1").await.unwrap();
    assert_eq!(status.status, VmStatus::Running);
    assert!(status.target_action.is_none());
    assert!(status.target_status.is_none());
}

#[tokio::test]
async fn test_control_failure_marks_vm() {
    let h = harness().await;
    running_mci(&h, 2).await;
    h.driver
        .inject(&Harness::instance_name("mci01", "g1-2"), Fault::FailControl);

    let report = h
        .fleet
        .actions
        .control_mci(NS, "mci01", VmAction::Suspend)
        .await
        .unwrap();
    assert_eq!(report.results[0].status, VmStatus::Suspended);
    assert_eq!(report.results[1].status, VmStatus::Failed);
    let vm = h.vm("mci01", "g1-2").await.unwrap();
    assert!(vm.system_message.unwrap().contains("suspend failed"));
}

#[tokio::test]
async fn test_status_picks_up_provider_changes() {
    let h = harness().await;
    running_mci(&h, 2).await;

    let csp_id = h.vm("mci01", "g1-1").await.unwrap().csp_vm_id.unwrap();
    h.driver.set_state(&csp_id, InstanceState::Suspended);
    h.driver
        .inject(&Harness::instance_name("mci01", "g1-2"), Fault::Lost);

    let status = h.fleet.status.mci_status(NS, "mci01", None).await.unwrap();
    assert_eq!(status.vms[0].status, VmStatus::Suspended);
    assert_eq!(status.vms[1].status, VmStatus::Failed);
    assert_eq!(status.status, MciStatus::PartialFailure);

    // Refreshed states are persisted
    assert_eq!(
        h.vm("mci01", "g1-1").await.unwrap().status,
        VmStatus::Suspended
    );

    let filtered = h
        .fleet
        .status
        .mci_status(NS, "mci01", Some(&VmFilter::new("status", "Failed")))
        .await
        .unwrap();
    assert_eq!(filtered.vms.len(), 1);
    assert_eq!(filtered.vms[0].id.as_str(), "g1-2");
}

#[tokio::test]
async fn test_delete_mci_terminates_and_removes() {
    let h = harness().await;
    running_mci(&h, 3).await;

    let report = h
        .fleet
        .lifecycle
        .delete_mci(NS, "mci01", DeleteOption::default())
        .await
        .unwrap();
    assert!(report.mci_removed);
    assert!(report.results.iter().all(|r| r.removed && r.error.is_none()));
    assert_eq!(h.driver.delete_calls(), 3);
    assert!(h.fleet.query.mci_ids(NS, None).await.unwrap().is_empty());
    assert!(h.vm("mci01", "g1-1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_force_delete_survives_hanging_driver() {
    let mut config = test_config();
    config.provisioning.driver_timeout = Duration::from_secs(10);
    let h = harness_with(config).await;
    running_mci(&h, 2).await;
    h.driver
        .inject(&Harness::instance_name("mci01", "g1-1"), Fault::HangDelete);

    let report = h
        .fleet
        .lifecycle
        .delete_mci(
            NS,
            "mci01",
            DeleteOption {
                force: true,
                terminate: true,
            },
        )
        .await
        .unwrap();

    assert!(report.mci_removed);
    assert!(report.results.iter().all(|r| r.removed));
    assert!(report.results[0].error.as_deref().unwrap().contains("terminate failed"));
    assert!(h.fleet.query.mci_ids(NS, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unconfirmed_termination_keeps_record() {
    let h = harness().await;
    running_mci(&h, 2).await;
    h.driver
        .inject(&Harness::instance_name("mci01", "g1-2"), Fault::FailDelete);

    let report = h
        .fleet
        .lifecycle
        .delete_mci(NS, "mci01", DeleteOption::default())
        .await
        .unwrap();

    assert!(!report.mci_removed);
    assert!(report.results[0].removed);
    assert!(!report.results[1].removed);

    let info = h.fleet.query.get_mci(NS, "mci01", None).await.unwrap();
    let ids: Vec<_> = info.vms.iter().map(|vm| vm.id.to_string()).collect();
    assert_eq!(ids, vec!["g1-2"]);
    assert_eq!(info.mci.sub_groups[0].vm_ids.len(), 1);
    assert!(info.vms[0]
        .system_message
        .as_deref()
        .unwrap()
        .contains("terminate failed"));
}

#[tokio::test]
async fn test_delete_after_terminate_skips_driver() {
    let h = harness().await;
    running_mci(&h, 2).await;
    h.fleet
        .actions
        .control_mci(NS, "mci01", VmAction::Terminate)
        .await
        .unwrap();
    assert_eq!(
        h.vm("mci01", "g1-1").await.unwrap().status,
        VmStatus::Terminating
    );
    // The next refresh sees the instances gone
    let status = h.fleet.status.mci_status(NS, "mci01", None).await.unwrap();
    assert_eq!(status.status, MciStatus::Terminated);
    let deletes = h.driver.delete_calls();

    let report = h
        .fleet
        .lifecycle
        .delete_mci(NS, "mci01", DeleteOption::default())
        .await
        .unwrap();
    assert!(report.mci_removed);
    assert_eq!(h.driver.delete_calls(), deletes);
}

#[tokio::test]
async fn test_record_only_delete_refuses_live_vm() {
    let h = harness().await;
    running_mci(&h, 1).await;

    let result = h
        .fleet
        .lifecycle
        .delete_vm(
            NS,
            "mci01",
            "g1-1",
            DeleteOption {
                force: false,
                terminate: false,
            },
        )
        .await
        .unwrap();
    assert!(!result.removed);
    assert!(h.vm("mci01", "g1-1").await.is_some());
    assert_eq!(h.driver.delete_calls(), 0);
}

#[tokio::test]
async fn test_delete_vm_updates_sub_group() {
    let h = harness().await;
    running_mci(&h, 2).await;

    let result = h
        .fleet
        .lifecycle
        .delete_vm(NS, "mci01", "g1-1", DeleteOption::default())
        .await
        .unwrap();
    assert!(result.removed);

    let info = h.fleet.query.get_mci(NS, "mci01", None).await.unwrap();
    assert_eq!(info.vms.len(), 1);
    assert_eq!(info.mci.sub_groups[0].vm_ids[0].as_str(), "g1-2");
}

#[tokio::test]
async fn test_refine_drops_failed_vms() {
    let h = harness().await;
    h.driver
        .inject(&Harness::instance_name("mci01", "g1-1"), Fault::FailCreate);
    running_mci(&h, 2).await;

    let removed = h.fleet.lifecycle.refine_mci(NS, "mci01").await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].as_str(), "g1-1");
    assert_eq!(h.driver.delete_calls(), 0);

    let info = h.fleet.query.get_mci(NS, "mci01", None).await.unwrap();
    assert_eq!(info.status, MciStatus::Running);
}

#[tokio::test]
async fn test_namespace_delete_requires_empty() {
    let h = harness().await;
    running_mci(&h, 1).await;

    let err = h.fleet.namespaces.delete(NS).await.unwrap_err();
    assert!(matches!(
        err,
        MciError::Validation(ValidationError::NamespaceNotEmpty { .. })
    ));

    h.fleet
        .lifecycle
        .delete_all_mci(NS, DeleteOption::default())
        .await
        .unwrap();
    h.fleet.namespaces.delete_ssh_key(NS, KEY).await.unwrap();
    h.fleet.namespaces.delete(NS).await.unwrap();
    assert!(h.fleet.namespaces.list().await.unwrap().is_empty());
}
