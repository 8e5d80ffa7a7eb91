//! Shared fixtures for the orchestrator integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use mci_core::config::OrchestratorConfig;
use mci_core::error::RemoteError;
use mci_core::model::{CommandOutput, ConnectionConfig, MciRequest, SshKey, Vm, VmTemplate};
use mci_core::traits::{RemoteShell, SshRoute};
use mci_core::{MciId, NamespaceId};
use mci_orchestrator::connection::DriverRegistry;
use mci_orchestrator::driver::SimulatedDriver;
use mci_orchestrator::store::MemoryStore;
use mci_orchestrator::{Fleet, OrchestratorState};

pub const NS: &str = "ns01";
pub const CONNECTION: &str = "sim-local";
pub const KEY: &str = "key01";

/// One call observed by the recording shell
#[derive(Debug, Clone)]
pub struct ShellCall {
    pub route: SshRoute,
    pub commands: Vec<String>,
    /// Destination path and size of an upload
    pub upload: Option<(String, usize)>,
}

/// Remote shell that records every call instead of opening SSH sessions
#[derive(Default)]
pub struct RecordingShell {
    calls: Mutex<Vec<ShellCall>>,
    unreachable: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    exit_codes: Mutex<HashMap<String, u32>>,
}

impl RecordingShell {
    /// Sessions to `host` fail to connect
    pub fn make_unreachable(&self, host: &str) {
        self.unreachable.lock().unwrap().insert(host.to_string());
    }

    /// Sessions to `host` never finish
    pub fn make_hanging(&self, host: &str) {
        self.hanging.lock().unwrap().insert(host.to_string());
    }

    /// Commands on `host` exit with `code`
    pub fn set_exit_code(&self, host: &str, code: u32) {
        self.exit_codes.lock().unwrap().insert(host.to_string(), code);
    }

    pub fn calls(&self) -> Vec<ShellCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, host: &str) -> Vec<ShellCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.route.target.host == host)
            .collect()
    }

    fn record(&self, route: &SshRoute, commands: &[String], upload: Option<(String, usize)>) {
        self.calls.lock().unwrap().push(ShellCall {
            route: route.clone(),
            commands: commands.to_vec(),
            upload,
        });
    }

    async fn hang_if_asked(&self, route: &SshRoute) {
        let hangs = self.hanging.lock().unwrap().contains(&route.target.host);
        if hangs {
            std::future::pending::<()>().await;
        }
    }

    fn check_reachable(&self, route: &SshRoute) -> Result<(), RemoteError> {
        if self.unreachable.lock().unwrap().contains(&route.target.host) {
            return Err(RemoteError::Connect {
                host: route.target.address(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteShell for RecordingShell {
    async fn run(
        &self,
        route: &SshRoute,
        commands: &[String],
    ) -> Result<Vec<CommandOutput>, RemoteError> {
        self.record(route, commands, None);
        self.check_reachable(route)?;
        self.hang_if_asked(route).await;
        let code = self
            .exit_codes
            .lock()
            .unwrap()
            .get(&route.target.host)
            .copied()
            .unwrap_or(0);
        Ok(commands
            .iter()
            .map(|command| CommandOutput {
                command: command.clone(),
                stdout: format!("ran on {}", route.target.host),
                stderr: String::new(),
                exit_status: Some(code),
            })
            .collect())
    }

    async fn upload(&self, route: &SshRoute, payload: Bytes, path: &str) -> Result<(), RemoteError> {
        self.record(route, &[], Some((path.to_string(), payload.len())));
        self.check_reachable(route)?;
        self.hang_if_asked(route).await;
        Ok(())
    }
}

/// Config with millisecond intervals so retry loops finish quickly
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.fanout.max_parallelism = 8;
    config.fanout.operation_deadline = Duration::from_secs(30);
    config.provisioning.running_poll_interval = Duration::from_millis(1);
    config.provisioning.running_poll_attempts = 5;
    config.provisioning.bootstrap_retry_delay = Duration::from_millis(1);
    config.provisioning.bootstrap_attempts = 30;
    config.provisioning.bootstrap_command = "install-agent".to_string();
    config.provisioning.driver_timeout = Duration::from_secs(5);
    config.remote.command_timeout = Duration::from_secs(5);
    config.remote.max_file_size = 1024;
    config.lifecycle.terminate_poll_interval = Duration::from_millis(1);
    config.lifecycle.terminate_poll_attempts = 3;
    config
}

pub struct Harness {
    pub fleet: Fleet,
    pub driver: Arc<SimulatedDriver>,
    pub shell: Arc<RecordingShell>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn state(&self) -> &OrchestratorState {
        self.fleet.state()
    }

    /// Stored VM record, bypassing the services
    pub async fn vm(&self, mci: &str, vm: &str) -> Option<Vm> {
        self.state()
            .repo
            .get_vm(
                &NamespaceId::new(NS),
                &MciId::new(mci),
                &mci_core::VmId::new(vm),
            )
            .await
            .unwrap()
    }

    /// Instance name the provisioner gives a VM
    pub fn instance_name(mci: &str, vm: &str) -> String {
        format!("{}-{}", mci, vm)
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

/// A fleet over an in-memory store with one simulated connection, the test
/// namespace and its SSH key already registered
pub async fn harness_with(config: OrchestratorConfig) -> Harness {
    let driver = Arc::new(SimulatedDriver::new("sim").with_boot_polls(1));
    let drivers = DriverRegistry::new();
    drivers.register(driver.clone());
    let shell = Arc::new(RecordingShell::default());
    let store = Arc::new(MemoryStore::new());

    let state = OrchestratorState::new(config, store.clone(), drivers, shell.clone());
    state
        .connections
        .register(ConnectionConfig {
            name: CONNECTION.to_string(),
            provider: "sim".to_string(),
            region: "local".to_string(),
            zone: None,
            credential: "sim-credential".to_string(),
        })
        .unwrap();

    let fleet = Fleet::new(state);
    fleet.namespaces.create(NS, "test namespace").await.unwrap();
    fleet
        .namespaces
        .register_ssh_key(
            NS,
            SshKey {
                id: KEY.to_string(),
                user_name: "cb-user".to_string(),
                private_key: "test-private-key".to_string(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

    Harness {
        fleet,
        driver,
        shell,
        store,
    }
}

pub fn template(name: &str, size: u32) -> VmTemplate {
    VmTemplate {
        name: name.to_string(),
        sub_group_size: size,
        connection_name: CONNECTION.to_string(),
        image_id: "ubuntu22".to_string(),
        spec_id: "small".to_string(),
        vnet_id: "vnet01".to_string(),
        subnet_id: "subnet01".to_string(),
        security_group_ids: vec!["sg01".to_string()],
        ssh_key_id: KEY.to_string(),
        ..Default::default()
    }
}

pub fn mci_request(name: &str, templates: Vec<VmTemplate>) -> MciRequest {
    MciRequest {
        name: name.to_string(),
        install_agent: true,
        vm: templates,
        ..Default::default()
    }
}
