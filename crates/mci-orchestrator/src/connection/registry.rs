//! Named connection registry

use dashmap::DashMap;

use mci_core::error::ValidationError;
use mci_core::model::ConnectionConfig;

/// Registry of named connections
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionConfig>,
}

impl ConnectionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create a registry seeded with connections
    pub fn with_connections(connections: impl IntoIterator<Item = ConnectionConfig>) -> Self {
        let registry = Self::new();
        for conn in connections {
            registry.connections.insert(conn.name.clone(), conn);
        }
        registry
    }

    /// Register or replace a connection
    pub fn register(&self, conn: ConnectionConfig) -> Result<(), ValidationError> {
        for (field, value) in [
            ("name", &conn.name),
            ("provider", &conn.provider),
            ("region", &conn.region),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::InvalidTemplate(format!(
                    "connection {} is required",
                    field
                )));
            }
        }
        tracing::info!(
            "Registered connection {} ({}/{})",
            conn.name,
            conn.provider,
            conn.region
        );
        self.connections.insert(conn.name.clone(), conn);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ConnectionConfig> {
        self.connections.get(name).map(|r| r.value().clone())
    }

    /// Look up a connection, rejecting unknown names
    pub fn require(&self, name: &str) -> Result<ConnectionConfig, ValidationError> {
        self.get(name)
            .ok_or_else(|| ValidationError::ConnectionNotFound(name.to_string()))
    }

    /// First connection (by name) serving a provider and region
    pub fn find(&self, provider: &str, region: &str) -> Option<ConnectionConfig> {
        let mut matches: Vec<_> = self
            .connections
            .iter()
            .filter(|r| {
                r.provider.eq_ignore_ascii_case(provider) && r.region.eq_ignore_ascii_case(region)
            })
            .map(|r| r.value().clone())
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches.into_iter().next()
    }

    /// All connections, sorted by name
    pub fn list(&self) -> Vec<ConnectionConfig> {
        let mut all: Vec<_> = self.connections.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn remove(&self, name: &str) -> Option<ConnectionConfig> {
        self.connections.remove(name).map(|(_, conn)| conn)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
