//! CLI integration tests
//!
//! Argument handling runs the bare binary. The fleet tests drive `mci`
//! against an in-process orchestrator backed by the simulated provider.

use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mci_core::config::{ConnectionEntry, OrchestratorConfig};
use mci_orchestrator::connection::DriverRegistry;
use mci_orchestrator::driver::SimulatedDriver;
use mci_orchestrator::ipc::IpcServer;
use mci_orchestrator::remote::SshShell;
use mci_orchestrator::store::MemoryStore;
use mci_orchestrator::{Fleet, OrchestratorState};

fn mci() -> Command {
    Command::cargo_bin("mci")
        .expect("Failed to locate mci binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    mci()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Multi-cloud VM fleet manager"));
}

#[test]
fn test_cli_version() {
    mci()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mci"));
}

#[test]
fn test_cli_delete_help() {
    mci()
        .args(["delete", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"))
        .stdout(predicate::str::contains("--keep-instances"));
}

#[test]
fn test_cli_unknown_command() {
    mci()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_cli_scale_out_requires_count() {
    mci().args(["scale-out", "mci01", "g1"]).assert().failure();
}

#[test]
fn test_cli_unreachable_daemon() {
    // Nothing listens on the discard port
    mci()
        .args(["--address", "127.0.0.1:9", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Is the orchestrator running"));
}

#[test]
fn test_cli_ping_unreachable() {
    mci()
        .args(["--address", "127.0.0.1:9", "ping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not responding"));
}

#[test]
fn test_cli_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();

    mci().args(["--config", path, "config", "init"]).assert().success();
    mci()
        .args(["--config", path, "config", "set", "fanout.max_parallelism", "12"])
        .assert()
        .success();
    mci()
        .args(["--config", path, "config", "get", "fanout.max_parallelism"])
        .assert()
        .success()
        .stdout(predicate::str::diff("12\n"));
    mci()
        .args(["--config", path, "config", "get", "fanout.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Key not found"));
}

struct TestDaemon {
    address: String,
    cancel: CancellationToken,
    dir: tempfile::TempDir,
}

impl TestDaemon {
    async fn start() -> Self {
        let mut config = OrchestratorConfig::default();
        config.provisioning.running_poll_interval = Duration::from_millis(1);
        config.lifecycle.terminate_poll_interval = Duration::from_millis(1);
        config.connections.insert(
            "sim-local".to_string(),
            ConnectionEntry {
                provider: "sim".to_string(),
                region: "local".to_string(),
                zone: None,
                credential: "none".to_string(),
            },
        );

        let drivers = DriverRegistry::new();
        drivers.register(Arc::new(SimulatedDriver::new("sim")));
        let shell = Arc::new(SshShell::new(config.remote.connect_timeout));
        let state = OrchestratorState::new(config, Arc::new(MemoryStore::new()), drivers, shell);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        let server =
            IpcServer::new(address.clone(), Fleet::new(state)).with_shutdown_token(cancel.clone());
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        Self {
            address,
            cancel,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    /// Run `mci` with the daemon address and namespace preset
    async fn run(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        let mut cmd = mci();
        cmd.env("MCI_ADDRESS", &self.address)
            .env("MCI_NAMESPACE", "ns01")
            .args(args);
        let handle = tokio::task::spawn_blocking(move || {
            let mut cmd = cmd;
            cmd.assert()
        });
        handle.await.unwrap()
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

const MCI_REQUEST: &str = r#"{
    "name": "mci01",
    "installAgent": false,
    "vm": [{
        "name": "web",
        "subGroupSize": 2,
        "connectionName": "sim-local",
        "imageId": "ubuntu22",
        "specId": "small",
        "vnetId": "vnet01",
        "subnetId": "subnet01",
        "securityGroupIds": ["sg01"],
        "sshKeyId": "key01"
    }]
}"#;

async fn seeded_daemon() -> TestDaemon {
    let daemon = TestDaemon::start().await;
    let key = daemon.write("id_ed25519", "test-private-key");

    daemon
        .run(&["namespace", "create", "ns01"])
        .await
        .success()
        .stdout(predicate::str::contains("Created namespace ns01"));
    daemon
        .run(&["key", "register", "key01", "--user", "cb-user", "--private-key", &key])
        .await
        .success();
    daemon
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fleet_round_trip() {
    let daemon = seeded_daemon().await;
    let request = daemon.write("mci.json", MCI_REQUEST);

    daemon
        .run(&["create", &request])
        .await
        .success()
        .stdout(predicate::str::contains("Created MCI mci01"))
        .stdout(predicate::str::contains("web-2"));

    daemon
        .run(&["list", "--view", "id"])
        .await
        .success()
        .stdout(predicate::str::diff("mci01\n"));

    daemon
        .run(&["get", "mci01", "--view", "id", "--filter", "id=web-1"])
        .await
        .success()
        .stdout(predicate::str::diff("web-1\n"));

    daemon
        .run(&["control", "mci01", "suspend"])
        .await
        .success()
        .stdout(predicate::str::contains("Suspended"));

    daemon
        .run(&["get", "mci01", "--view", "status"])
        .await
        .success()
        .stdout(predicate::str::contains("Status: Suspended"));

    daemon
        .run(&["scale-out", "mci01", "web", "1"])
        .await
        .success()
        .stdout(predicate::str::contains("web-3"));

    daemon
        .run(&["delete", "mci01"])
        .await
        .success()
        .stdout(predicate::str::contains("MCI mci01: removed"));

    daemon
        .run(&["list"])
        .await
        .success()
        .stdout(predicate::str::contains("No MCIs"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_reports_daemon_errors() {
    let daemon = seeded_daemon().await;

    daemon
        .run(&["get", "ghost"])
        .await
        .failure()
        .stderr(predicate::str::contains("MCI not found"));

    daemon
        .run(&["scale-out", "ghost", "web", "-1"])
        .await
        .failure();

    // The namespace still owns the SSH key
    daemon
        .run(&["namespace", "delete", "ns01"])
        .await
        .failure()
        .stderr(predicate::str::contains("not empty"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_status_and_stop() {
    let daemon = TestDaemon::start().await;

    daemon
        .run(&["status"])
        .await
        .success()
        .stdout(predicate::str::contains("Orchestrator Status: Running"))
        .stdout(predicate::str::contains("Providers: sim"));

    daemon
        .run(&["connection", "list"])
        .await
        .success()
        .stdout(predicate::str::contains("sim-local"));

    daemon
        .run(&["stop"])
        .await
        .success()
        .stdout(predicate::str::contains("Orchestrator stopped"));
    assert!(daemon.cancel.is_cancelled());
}
