//! Typed access to fleet records

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use mci_core::error::{MciError, StoreError, ValidationError};
use mci_core::model::{Mci, Namespace, SshKey, Vm, VnetBastions};
use mci_core::traits::RecordStore;
use mci_core::types::{MciId, NamespaceId, VmId};

use super::keys;

/// Narrow repository over a [`RecordStore`].
///
/// Cheap to clone; every service and per-VM task holds its own copy.
#[derive(Clone)]
pub struct FleetRepository {
    store: Arc<dyn RecordStore>,
}

impl FleetRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Serialization {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.store.put(key, raw).await
    }

    async fn list_matching<T: DeserializeOwned>(
        &self,
        prefix: &str,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for (key, raw) in self.store.list(prefix).await? {
            if !keep(&key) {
                continue;
            }
            let value = serde_json::from_str(&raw)
                .map_err(|source| StoreError::Serialization { key, source })?;
            out.push(value);
        }
        Ok(out)
    }

    async fn list_children<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        self.list_matching(prefix, |key| keys::is_direct_child(prefix, key))
            .await
    }

    // Namespaces

    pub async fn get_namespace(&self, ns: &NamespaceId) -> Result<Option<Namespace>, StoreError> {
        self.read(&keys::namespace(ns.as_str())).await
    }

    pub async fn require_namespace(&self, ns: &NamespaceId) -> Result<Namespace, MciError> {
        self.get_namespace(ns)
            .await?
            .ok_or_else(|| ValidationError::NamespaceNotFound(ns.to_string()).into())
    }

    pub async fn put_namespace(&self, namespace: &Namespace) -> Result<(), StoreError> {
        self.write(&keys::namespace(namespace.id.as_str()), namespace)
            .await
    }

    pub async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        self.list_children(keys::namespaces()).await
    }

    pub async fn delete_namespace(&self, ns: &NamespaceId) -> Result<bool, StoreError> {
        self.store.delete(&keys::namespace(ns.as_str())).await
    }

    /// Number of records stored under a namespace
    pub async fn count_namespace_records(&self, ns: &NamespaceId) -> Result<usize, StoreError> {
        Ok(self
            .store
            .list(&keys::namespace_children(ns.as_str()))
            .await?
            .len())
    }

    // MCIs

    pub async fn get_mci(&self, ns: &NamespaceId, mci: &MciId) -> Result<Option<Mci>, StoreError> {
        self.read(&keys::mci(ns.as_str(), mci.as_str())).await
    }

    pub async fn require_mci(&self, ns: &NamespaceId, mci: &MciId) -> Result<Mci, MciError> {
        self.get_mci(ns, mci).await?.ok_or_else(|| {
            ValidationError::MciNotFound {
                ns: ns.to_string(),
                mci: mci.to_string(),
            }
            .into()
        })
    }

    pub async fn put_mci(&self, ns: &NamespaceId, mci: &Mci) -> Result<(), StoreError> {
        self.write(&keys::mci(ns.as_str(), mci.id.as_str()), mci)
            .await
    }

    pub async fn list_mcis(&self, ns: &NamespaceId) -> Result<Vec<Mci>, StoreError> {
        self.list_children(&keys::mcis(ns.as_str())).await
    }

    pub async fn delete_mci(&self, ns: &NamespaceId, mci: &MciId) -> Result<bool, StoreError> {
        self.store
            .delete(&keys::mci(ns.as_str(), mci.as_str()))
            .await
    }

    // VMs

    pub async fn get_vm(
        &self,
        ns: &NamespaceId,
        mci: &MciId,
        vm: &VmId,
    ) -> Result<Option<Vm>, StoreError> {
        self.read(&keys::vm(ns.as_str(), mci.as_str(), vm.as_str()))
            .await
    }

    pub async fn require_vm(&self, ns: &NamespaceId, mci: &MciId, vm: &VmId) -> Result<Vm, MciError> {
        self.get_vm(ns, mci, vm).await?.ok_or_else(|| {
            ValidationError::VmNotFound {
                mci: mci.to_string(),
                vm: vm.to_string(),
            }
            .into()
        })
    }

    pub async fn put_vm(&self, ns: &NamespaceId, mci: &MciId, vm: &Vm) -> Result<(), StoreError> {
        self.write(&keys::vm(ns.as_str(), mci.as_str(), vm.id.as_str()), vm)
            .await
    }

    /// Every VM record of an MCI, sorted by id
    pub async fn list_vms(&self, ns: &NamespaceId, mci: &MciId) -> Result<Vec<Vm>, StoreError> {
        self.list_children(&keys::vms(ns.as_str(), mci.as_str()))
            .await
    }

    pub async fn delete_vm(
        &self,
        ns: &NamespaceId,
        mci: &MciId,
        vm: &VmId,
    ) -> Result<bool, StoreError> {
        self.store
            .delete(&keys::vm(ns.as_str(), mci.as_str(), vm.as_str()))
            .await
    }

    // SSH keys

    pub async fn get_ssh_key(&self, ns: &NamespaceId, id: &str) -> Result<Option<SshKey>, StoreError> {
        self.read(&keys::ssh_key(ns.as_str(), id)).await
    }

    pub async fn require_ssh_key(&self, ns: &NamespaceId, id: &str) -> Result<SshKey, MciError> {
        self.get_ssh_key(ns, id)
            .await?
            .ok_or_else(|| ValidationError::SshKeyNotFound(id.to_string()).into())
    }

    pub async fn put_ssh_key(&self, ns: &NamespaceId, key: &SshKey) -> Result<(), StoreError> {
        self.write(&keys::ssh_key(ns.as_str(), &key.id), key).await
    }

    pub async fn list_ssh_keys(&self, ns: &NamespaceId) -> Result<Vec<SshKey>, StoreError> {
        self.list_children(&keys::ssh_keys(ns.as_str())).await
    }

    pub async fn delete_ssh_key(&self, ns: &NamespaceId, id: &str) -> Result<bool, StoreError> {
        self.store.delete(&keys::ssh_key(ns.as_str(), id)).await
    }

    // Bastion assignments

    /// Bastions of a VNet; empty when none are assigned
    pub async fn get_vnet_bastions(
        &self,
        ns: &NamespaceId,
        vnet: &str,
    ) -> Result<VnetBastions, StoreError> {
        Ok(self
            .read(&keys::vnet_bastion(ns.as_str(), vnet))
            .await?
            .unwrap_or_else(|| VnetBastions {
                vnet_id: vnet.to_string(),
                nodes: Vec::new(),
            }))
    }

    /// Store a VNet's bastion list, removing the record once it is empty
    pub async fn put_vnet_bastions(
        &self,
        ns: &NamespaceId,
        bastions: &VnetBastions,
    ) -> Result<(), StoreError> {
        let key = keys::vnet_bastion(ns.as_str(), &bastions.vnet_id);
        if bastions.nodes.is_empty() {
            self.store.delete(&key).await.map(|_| ())
        } else {
            self.write(&key, bastions).await
        }
    }

    pub async fn list_vnet_bastions(&self, ns: &NamespaceId) -> Result<Vec<VnetBastions>, StoreError> {
        self.list_matching(&keys::vnets(ns.as_str()), |key| key.ends_with("/bastion"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use mci_core::model::BastionNode;

    fn repo() -> FleetRepository {
        FleetRepository::new(Arc::new(MemoryStore::new()))
    }

    fn namespace(id: &str) -> Namespace {
        Namespace {
            id: NamespaceId::new(id),
            description: String::new(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_list_namespaces_skips_nested_records() {
        let repo = repo();
        repo.put_namespace(&namespace("ns01")).await.unwrap();
        repo.put_namespace(&namespace("ns02")).await.unwrap();
        repo.put_ssh_key(
            &NamespaceId::new("ns01"),
            &SshKey {
                id: "key01".to_string(),
                user_name: "cb-user".to_string(),
                private_key: "k".to_string(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

        let listed = repo.list_namespaces().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(
            repo.count_namespace_records(&NamespaceId::new("ns01"))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_require_reports_missing_records() {
        let repo = repo();
        let ns = NamespaceId::new("ns01");
        let err = repo.require_namespace(&ns).await.unwrap_err();
        assert!(matches!(
            err,
            MciError::Validation(ValidationError::NamespaceNotFound(_))
        ));

        let err = repo.require_mci(&ns, &MciId::new("mci01")).await.unwrap_err();
        assert!(matches!(
            err,
            MciError::Validation(ValidationError::MciNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_bastion_list_is_removed() {
        let repo = repo();
        let ns = NamespaceId::new("ns01");
        let mut bastions = repo.get_vnet_bastions(&ns, "vnet01").await.unwrap();
        assert!(bastions.nodes.is_empty());

        bastions.nodes.push(BastionNode {
            mci_id: MciId::new("mci01"),
            vm_id: VmId::new("g1-1"),
        });
        repo.put_vnet_bastions(&ns, &bastions).await.unwrap();
        assert_eq!(repo.list_vnet_bastions(&ns).await.unwrap().len(), 1);

        bastions.nodes.clear();
        repo.put_vnet_bastions(&ns, &bastions).await.unwrap();
        assert!(repo.list_vnet_bastions(&ns).await.unwrap().is_empty());
    }
}
