//! Core trait definition for the object storage layer

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{StorageError, StorageResult};

/// Bucket/key object store used for job artifacts and user data objects
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Backend name as selected in configuration (`localhost`, `memory`)
    fn backend(&self) -> &str;

    /// Store an object, replacing any previous body
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()>;

    /// Read a whole object
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Read `[start, end)` of an object
    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<u8>> {
        let body = self.get_object(bucket, key).await?;
        let len = body.len() as u64;
        let start = start.min(len) as usize;
        let end = end.min(len) as usize;
        Ok(body[start..end.max(start)].to_vec())
    }

    /// Object size in bytes, `None` when absent
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>>;

    /// Delete the given keys, returning how many existed
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<usize>;

    /// List keys under a prefix, sorted
    async fn list_keys(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Serialize `value` as JSON and store it
pub async fn put_json<T: Serialize + Sync>(
    storage: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let body = serde_json::to_vec(value).map_err(StorageError::serialization)?;
    storage.put_object(bucket, key, body).await
}

/// Read and deserialize a JSON object
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
) -> StorageResult<T> {
    let body = storage.get_object(bucket, key).await?;
    serde_json::from_slice(&body).map_err(StorageError::serialization)
}

/// Delete every key under a prefix
pub async fn delete_prefix(
    storage: &dyn ObjectStorage,
    bucket: &str,
    prefix: &str,
) -> StorageResult<usize> {
    let keys = storage.list_keys(bucket, prefix).await?;
    if keys.is_empty() {
        return Ok(0);
    }
    storage.delete_objects(bucket, &keys).await
}
