//! Namespaces and the SSH keys registered in them

use mci_core::api::SshKeySummary;
use mci_core::error::{MciError, ValidationError};
use mci_core::model::{Namespace, SshKey};
use mci_core::time::current_time_millis;
use mci_core::types::{NamespaceId, SshKeyId};

use crate::state::OrchestratorState;

#[derive(Clone)]
pub struct NamespaceService {
    state: OrchestratorState,
}

impl NamespaceService {
    pub fn new(state: OrchestratorState) -> Self {
        Self { state }
    }

    pub async fn create(&self, ns: &str, description: &str) -> Result<Namespace, MciError> {
        let id = NamespaceId::parse(ns)?;
        if self.state.repo.get_namespace(&id).await?.is_some() {
            return Err(ValidationError::NamespaceExists(id.to_string()).into());
        }
        let namespace = Namespace {
            id,
            description: description.to_string(),
            created_at: current_time_millis(),
        };
        self.state.repo.put_namespace(&namespace).await?;
        tracing::info!("Created namespace {}", namespace.id);
        Ok(namespace)
    }

    pub async fn get(&self, ns: &str) -> Result<Namespace, MciError> {
        self.state.repo.require_namespace(&NamespaceId::parse(ns)?).await
    }

    pub async fn list(&self) -> Result<Vec<Namespace>, MciError> {
        Ok(self.state.repo.list_namespaces().await?)
    }

    /// Delete an empty namespace; anything still stored under it blocks
    /// the deletion
    pub async fn delete(&self, ns: &str) -> Result<(), MciError> {
        let id = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&id).await?;
        let count = self.state.repo.count_namespace_records(&id).await?;
        if count > 0 {
            return Err(ValidationError::NamespaceNotEmpty {
                ns: id.to_string(),
                count,
            }
            .into());
        }
        self.state.repo.delete_namespace(&id).await?;
        tracing::info!("Deleted namespace {}", id);
        Ok(())
    }

    /// Register or replace an SSH key
    pub async fn register_ssh_key(&self, ns: &str, mut key: SshKey) -> Result<SshKeySummary, MciError> {
        let id = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&id).await?;
        key.id = SshKeyId::parse(&key.id)?.to_string();
        if key.private_key.trim().is_empty() {
            return Err(ValidationError::InvalidTemplate(format!(
                "SSH key {}: privateKey is required",
                key.id
            ))
            .into());
        }
        self.state.repo.put_ssh_key(&id, &key).await?;
        tracing::info!("Registered SSH key {}/{}", id, key.id);
        Ok(SshKeySummary::from(&key))
    }

    pub async fn list_ssh_keys(&self, ns: &str) -> Result<Vec<SshKeySummary>, MciError> {
        let id = NamespaceId::parse(ns)?;
        self.state.repo.require_namespace(&id).await?;
        Ok(self
            .state
            .repo
            .list_ssh_keys(&id)
            .await?
            .iter()
            .map(SshKeySummary::from)
            .collect())
    }

    pub async fn delete_ssh_key(&self, ns: &str, key_id: &str) -> Result<(), MciError> {
        let id = NamespaceId::parse(ns)?;
        let key_id = SshKeyId::parse(key_id)?;
        if !self.state.repo.delete_ssh_key(&id, key_id.as_str()).await? {
            return Err(ValidationError::SshKeyNotFound(key_id.to_string()).into());
        }
        tracing::info!("Deleted SSH key {}/{}", id, key_id);
        Ok(())
    }
}
