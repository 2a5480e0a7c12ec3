//! File-based storage backend implementation
//!
//! Objects live at `<root>/<bucket>/<key>`; keys use `/` as separator.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use walkdir::WalkDir;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::ObjectStorage,
};

/// File-based storage backend
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Create a new file backend rooted at `root`, creating it if needed
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory of the backend
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if bucket.is_empty() || key.is_empty() || escapes {
            return Err(StorageError::configuration(format!(
                "invalid object location '{}/{}'",
                bucket, key
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn not_found(bucket: &str, key: &str, err: std::io::Error) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(format!("{}/{}", bucket, key))
        } else {
            StorageError::Io(err)
        }
    }
}

#[async_trait]
impl ObjectStorage for FileBackend {
    fn backend(&self) -> &str {
        "localhost"
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        Self::ensure_parent(&path).await?;

        // Write-then-rename so concurrent readers never see a partial body
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path)
            .await
            .map_err(|e| Self::not_found(bucket, key, e))
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found(bucket, key, e))?;
        let len = file.metadata().await?.len();
        let start = start.min(len);
        let end = end.min(len).max(start);

        file.seek(std::io::SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<u64>> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<usize> {
        let mut removed = 0;
        for key in keys {
            let path = self.object_path(bucket, key)?;
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let bucket_dir = self.root.join(bucket);
        let prefix = prefix.to_string();

        let keys = tokio::task::spawn_blocking(move || {
            if !bucket_dir.is_dir() {
                return Vec::new();
            }
            let mut keys: Vec<String> = WalkDir::new(&bucket_dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let relative = entry.path().strip_prefix(&bucket_dir).ok()?;
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    key.starts_with(&prefix).then_some(key)
                })
                .filter(|key| !key.contains(".tmp-"))
                .collect();
            keys.sort();
            keys
        })
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_and_listing() {
        let dir = TempDir::new().unwrap();
        let storage = FileBackend::new(dir.path()).await.unwrap();

        storage
            .put_object("bucket", "jobs/x/M000/00000/output.json", b"{}".to_vec())
            .await
            .unwrap();
        storage
            .put_object("bucket", "jobs/x/M000/00001/output.json", b"[]".to_vec())
            .await
            .unwrap();
        storage
            .put_object("bucket", "functions/add.json", b"{}".to_vec())
            .await
            .unwrap();

        let keys = storage.list_keys("bucket", "jobs/x/").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "jobs/x/M000/00000/output.json".to_string(),
                "jobs/x/M000/00001/output.json".to_string()
            ]
        );
        assert_eq!(
            storage
                .get_object("bucket", "jobs/x/M000/00001/output.json")
                .await
                .unwrap(),
            b"[]"
        );
        assert_eq!(storage.delete_objects("bucket", &keys).await.unwrap(), 2);
        assert_eq!(
            storage.head_object("bucket", "functions/add.json").await.unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_range_read_is_clamped() {
        let dir = TempDir::new().unwrap();
        let storage = FileBackend::new(dir.path()).await.unwrap();
        storage
            .put_object("data", "words.txt", b"hello world".to_vec())
            .await
            .unwrap();

        assert_eq!(
            storage.get_range("data", "words.txt", 6, 100).await.unwrap(),
            b"world"
        );
        assert!(storage.get_range("data", "words.txt", 20, 30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let storage = FileBackend::new(dir.path()).await.unwrap();
        let err = storage
            .put_object("data", "../outside", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
        assert!(storage
            .get_object("data", "missing")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
