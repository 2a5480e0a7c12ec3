//! In-memory storage backend

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::ObjectStorage,
};

/// Process-local object store; contents vanish with the executor
#[derive(Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<(String, String), Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create an empty memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects across all buckets
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether no object is stored
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryBackend {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>> {
        Ok(self
            .objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|body| body.len() as u64))
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<usize> {
        let mut objects = self.objects.write().await;
        let removed = keys
            .iter()
            .filter(|key| {
                objects
                    .remove(&(bucket.to_string(), (*key).clone()))
                    .is_some()
            })
            .count();
        Ok(removed)
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryBackend::new();
        storage
            .put_object("data", "jobs/a/output.json", b"42".to_vec())
            .await
            .unwrap();
        storage
            .put_object("data", "jobs/b/output.json", b"7".to_vec())
            .await
            .unwrap();

        assert_eq!(
            storage.get_object("data", "jobs/a/output.json").await.unwrap(),
            b"42"
        );
        assert_eq!(
            storage.head_object("data", "jobs/b/output.json").await.unwrap(),
            Some(1)
        );
        assert_eq!(storage.list_keys("data", "jobs/").await.unwrap().len(), 2);

        let removed = storage
            .delete_objects(
                "data",
                &["jobs/a/output.json".to_string(), "missing".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage
            .get_object("data", "jobs/a/output.json")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let storage = MemoryBackend::new();
        storage.put_object("one", "k", vec![1]).await.unwrap();
        assert!(storage.list_keys("two", "").await.unwrap().is_empty());
        assert_eq!(storage.get_range("one", "k", 0, 10).await.unwrap(), vec![1]);
    }
}
