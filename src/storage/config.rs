//! Storage backend selection

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use super::error::StorageError;

/// Storage backends compiled into this build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Filesystem under `storage_root`
    Localhost,
    /// Process memory
    Memory,
}

impl FromStr for BackendType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "localhost" | "local" | "file" => Ok(Self::Localhost),
            "memory" => Ok(Self::Memory),
            "aws_s3" | "ibm_cos" | "gcp_storage" | "azure_storage" | "oracle_oss" | "redis"
            | "minio" | "ceph" | "swift" => Err(StorageError::Configuration(format!(
                "storage backend '{}' is not available in this build (available: localhost, memory)",
                s
            ))),
            other => Err(StorageError::Configuration(format!(
                "unknown storage backend '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Localhost => write!(f, "localhost"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Resolved storage configuration for one executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: BackendType,
    /// Bucket holding job artifacts
    pub bucket: String,
    /// Root directory for the `localhost` backend
    pub root: PathBuf,
}
