//! Shared orchestrator state

use std::sync::Arc;
use std::time::{Duration, Instant};

use mci_core::config::OrchestratorConfig;
use mci_core::error::ValidationError;
use mci_core::traits::{RecordStore, RemoteShell};

use crate::connection::{ConnectionRegistry, DriverRegistry, ResolvedConnection};
use crate::fanout::FanOut;
use crate::store::FleetRepository;

/// Everything a fleet operation needs, cheap to clone into per-VM tasks
#[derive(Clone)]
pub struct OrchestratorState {
    pub config: Arc<OrchestratorConfig>,
    pub repo: FleetRepository,
    pub connections: Arc<ConnectionRegistry>,
    pub drivers: Arc<DriverRegistry>,
    pub shell: Arc<dyn RemoteShell>,
    started: Instant,
}

impl OrchestratorState {
    /// Build state with connections seeded from the config
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn RecordStore>,
        drivers: DriverRegistry,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        let connections = ConnectionRegistry::with_connections(config.connection_configs());
        Self {
            config: Arc::new(config),
            repo: FleetRepository::new(store),
            connections: Arc::new(connections),
            drivers: Arc::new(drivers),
            shell,
            started: Instant::now(),
        }
    }

    /// Look up a connection by name and pair it with its driver
    pub fn resolve_connection(&self, name: &str) -> Result<ResolvedConnection, ValidationError> {
        let conn = self.connections.require(name)?;
        self.drivers.resolve(conn)
    }

    /// A fan-out bounded by the configured parallelism
    pub fn fan_out<T: Send + 'static>(&self) -> FanOut<T> {
        FanOut::new(self.config.fanout.max_parallelism)
    }

    /// Deadline of one orchestration call
    pub fn deadline(&self) -> Duration {
        self.config.fanout.operation_deadline
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
