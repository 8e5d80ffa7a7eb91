//! Hierarchical key-value store holding the durable fleet records

use async_trait::async_trait;

use crate::error::StoreError;

/// Key-value store over `/`-separated keys with JSON string values.
///
/// There is no multi-key transaction: every read-modify-write is last
/// writer wins.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read one value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, sorted by key
    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Insert or overwrite a value
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove a value; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
