//! In-process simulated provider
//!
//! Backs local dry runs and the test suite. Faults are injected per
//! instance name, so a test can make one member of a SubGroup misbehave
//! while its siblings provision normally.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use mci_core::error::DriverError;
use mci_core::model::ConnectionConfig;
use mci_core::traits::{CloudDriver, InstanceAction, InstanceInfo, InstanceRequest, InstanceState};

/// Misbehaviour that can be injected for one instance name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Create returns a provider error
    FailCreate,
    /// Create never returns
    HangCreate,
    /// The instance never leaves `Creating`
    NeverRunning,
    /// The instance runs without any address
    NoAddress,
    /// Delete returns a provider error
    FailDelete,
    /// Delete never returns
    HangDelete,
    /// Power actions return a provider error
    FailControl,
    /// Power actions never return
    HangControl,
    /// Describe reports the instance as unknown
    Lost,
}

#[derive(Debug, Clone)]
struct SimInstance {
    name: String,
    state: InstanceState,
    polls: u32,
    public_ip: Option<String>,
    private_ip: Option<String>,
}

#[derive(Debug, Default)]
struct CallCounts {
    create: AtomicU32,
    get: AtomicU32,
    delete: AtomicU32,
    control: AtomicU32,
}

/// Simulated cloud provider
pub struct SimulatedDriver {
    provider: String,
    /// Describe calls that still report `Creating` after create
    boot_polls: u32,
    instances: DashMap<String, SimInstance>,
    faults: DashMap<String, HashSet<Fault>>,
    polls_by_name: DashMap<String, u32>,
    deletes_by_name: DashMap<String, u32>,
    next_id: AtomicU64,
    calls: CallCounts,
}

impl SimulatedDriver {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            boot_polls: 1,
            instances: DashMap::new(),
            faults: DashMap::new(),
            polls_by_name: DashMap::new(),
            deletes_by_name: DashMap::new(),
            next_id: AtomicU64::new(1),
            calls: CallCounts::default(),
        }
    }

    /// Number of describe calls an instance stays in `Creating`
    pub fn with_boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls;
        self
    }

    /// Inject a fault for the instance created under `name`
    pub fn inject(&self, name: &str, fault: Fault) {
        self.faults.entry(name.to_string()).or_default().insert(fault);
    }

    pub fn clear_faults(&self, name: &str) {
        self.faults.remove(name);
    }

    fn has_fault(&self, name: &str, fault: Fault) -> bool {
        self.faults
            .get(name)
            .map(|f| f.contains(&fault))
            .unwrap_or(false)
    }

    pub fn create_calls(&self) -> u32 {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.calls.get.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.calls.delete.load(Ordering::SeqCst)
    }

    pub fn control_calls(&self) -> u32 {
        self.calls.control.load(Ordering::SeqCst)
    }

    /// Describe calls made for an instance name
    pub fn polls_for(&self, name: &str) -> u32 {
        self.polls_by_name.get(name).map(|n| *n).unwrap_or(0)
    }

    /// Delete calls made for an instance name
    pub fn deletes_for(&self, name: &str) -> u32 {
        self.deletes_by_name.get(name).map(|n| *n).unwrap_or(0)
    }

    /// Provider id of the instance created under `name`
    pub fn find_by_name(&self, name: &str) -> Option<String> {
        self.instances
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.key().clone())
    }

    pub fn instance_state(&self, csp_id: &str) -> Option<InstanceState> {
        self.instances.get(csp_id).map(|r| r.state)
    }

    /// Change an instance's state behind the orchestrator's back
    pub fn set_state(&self, csp_id: &str, state: InstanceState) {
        if let Some(mut instance) = self.instances.get_mut(csp_id) {
            instance.state = state;
        }
    }

    fn name_of(&self, csp_id: &str) -> Result<String, DriverError> {
        self.instances
            .get(csp_id)
            .map(|r| r.name.clone())
            .ok_or_else(|| DriverError::NotFound(csp_id.to_string()))
    }
}

#[async_trait]
impl CloudDriver for SimulatedDriver {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn create_instance(
        &self,
        conn: &ConnectionConfig,
        req: &InstanceRequest,
    ) -> Result<String, DriverError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);

        if self.has_fault(&req.name, Fault::HangCreate) {
            return std::future::pending().await;
        }
        if self.has_fault(&req.name, Fault::FailCreate) {
            return Err(DriverError::Provider(format!(
                "simulated create failure for {}",
                req.name
            )));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let csp_id = format!("{}-{}-{:06}", self.provider, conn.region, n);
        let (public_ip, private_ip) = if self.has_fault(&req.name, Fault::NoAddress) {
            (None, None)
        } else {
            (
                Some(format!("198.51.100.{}", n % 254 + 1)),
                Some(format!("10.0.{}.{}", (n / 254) % 256, n % 254 + 1)),
            )
        };

        self.instances.insert(
            csp_id.clone(),
            SimInstance {
                name: req.name.clone(),
                state: InstanceState::Creating,
                polls: 0,
                public_ip,
                private_ip,
            },
        );
        tracing::debug!("Simulated instance {} created as {}", req.name, csp_id);
        Ok(csp_id)
    }

    async fn get_instance(
        &self,
        _conn: &ConnectionConfig,
        csp_id: &str,
    ) -> Result<InstanceInfo, DriverError> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        let name = self.name_of(csp_id)?;
        *self.polls_by_name.entry(name.clone()).or_insert(0) += 1;

        if self.has_fault(&name, Fault::Lost) {
            return Err(DriverError::NotFound(csp_id.to_string()));
        }
        let never_running = self.has_fault(&name, Fault::NeverRunning);

        let mut instance = self
            .instances
            .get_mut(csp_id)
            .ok_or_else(|| DriverError::NotFound(csp_id.to_string()))?;
        instance.polls += 1;
        if instance.state == InstanceState::Creating
            && !never_running
            && instance.polls > self.boot_polls
        {
            instance.state = InstanceState::Running;
        }

        let assigned = instance.state != InstanceState::Creating;
        Ok(InstanceInfo {
            csp_id: csp_id.to_string(),
            state: instance.state,
            public_ip: instance.public_ip.clone().filter(|_| assigned),
            private_ip: instance.private_ip.clone().filter(|_| assigned),
            ssh_port: Some(22),
        })
    }

    async fn delete_instance(&self, _conn: &ConnectionConfig, csp_id: &str) -> Result<(), DriverError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        let name = self.name_of(csp_id)?;
        *self.deletes_by_name.entry(name.clone()).or_insert(0) += 1;

        if self.has_fault(&name, Fault::HangDelete) {
            return std::future::pending().await;
        }
        if self.has_fault(&name, Fault::FailDelete) {
            return Err(DriverError::Provider(format!(
                "simulated delete failure for {}",
                name
            )));
        }

        let mut instance = self
            .instances
            .get_mut(csp_id)
            .ok_or_else(|| DriverError::NotFound(csp_id.to_string()))?;
        if instance.state == InstanceState::Terminated {
            return Err(DriverError::NotFound(csp_id.to_string()));
        }
        instance.state = InstanceState::Terminated;
        Ok(())
    }

    async fn control_instance(
        &self,
        _conn: &ConnectionConfig,
        csp_id: &str,
        action: InstanceAction,
    ) -> Result<InstanceState, DriverError> {
        self.calls.control.fetch_add(1, Ordering::SeqCst);
        let name = self.name_of(csp_id)?;

        if self.has_fault(&name, Fault::HangControl) {
            return std::future::pending().await;
        }
        if self.has_fault(&name, Fault::FailControl) {
            return Err(DriverError::Provider(format!(
                "simulated {} failure for {}",
                action.as_str(),
                name
            )));
        }

        let mut instance = self
            .instances
            .get_mut(csp_id)
            .ok_or_else(|| DriverError::NotFound(csp_id.to_string()))?;
        let (required, next, reported) = match action {
            InstanceAction::Suspend => (
                InstanceState::Running,
                InstanceState::Suspended,
                InstanceState::Suspended,
            ),
            InstanceAction::Resume => (
                InstanceState::Suspended,
                InstanceState::Running,
                InstanceState::Running,
            ),
            InstanceAction::Reboot => (
                InstanceState::Running,
                InstanceState::Running,
                InstanceState::Rebooting,
            ),
        };
        if instance.state != required {
            return Err(DriverError::Provider(format!(
                "cannot {} instance in state {:?}",
                action.as_str(),
                instance.state
            )));
        }
        instance.state = next;
        Ok(reported)
    }
}
