//! Cloud driver registry

use std::sync::Arc;

use dashmap::DashMap;

use mci_core::error::ValidationError;
use mci_core::model::ConnectionConfig;
use mci_core::traits::CloudDriver;

/// Drivers keyed by provider name (lower-cased)
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn CloudDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
        }
    }

    /// Register a driver for its own provider
    pub fn register(&self, driver: Arc<dyn CloudDriver>) {
        let provider = driver.provider().to_ascii_lowercase();
        self.register_as(&provider, driver);
    }

    /// Register a driver under an explicit provider name
    pub fn register_as(&self, provider: &str, driver: Arc<dyn CloudDriver>) {
        tracing::debug!("Registered cloud driver for provider {}", provider);
        self.drivers.insert(provider.to_ascii_lowercase(), driver);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn CloudDriver>> {
        self.drivers
            .get(&provider.to_ascii_lowercase())
            .map(|r| Arc::clone(r.value()))
    }

    /// Resolve the driver for a connection
    pub fn resolve(&self, conn: ConnectionConfig) -> Result<ResolvedConnection, ValidationError> {
        let driver = self
            .get(&conn.provider)
            .ok_or_else(|| ValidationError::ProviderNotSupported(conn.provider.clone()))?;
        Ok(ResolvedConnection {
            config: conn,
            driver,
        })
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.drivers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection paired with the driver serving it
#[derive(Clone)]
pub struct ResolvedConnection {
    pub config: ConnectionConfig,
    pub driver: Arc<dyn CloudDriver>,
}

impl std::fmt::Debug for ResolvedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConnection")
            .field("config", &self.config)
            .field("provider", &self.driver.provider())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;

    #[test]
    fn test_resolve_by_provider() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(SimulatedDriver::new("sim")));

        let conn = ConnectionConfig {
            name: "sim-local".to_string(),
            provider: "SIM".to_string(),
            region: "local".to_string(),
            zone: None,
            credential: String::new(),
        };
        let resolved = registry.resolve(conn.clone()).unwrap();
        assert_eq!(resolved.driver.provider(), "sim");

        let unknown = ConnectionConfig {
            provider: "aws".to_string(),
            ..conn
        };
        assert_eq!(
            registry.resolve(unknown).unwrap_err(),
            ValidationError::ProviderNotSupported("aws".to_string())
        );
        assert_eq!(registry.providers(), vec!["sim".to_string()]);
    }
}
