//! Executor configuration
//!
//! Configuration is a YAML document with a `compute` section plus one
//! section per compute backend (and `localhost`, `rabbitmq`). Caller
//! overrides are deep-merged over the file before the typed sections are
//! extracted.

pub mod loader;

pub use loader::{project_dirs, ConfigLoader, CONFIG_FILE_ENV, LOCAL_CONFIG_FILE};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::{ComputeError, ErrorCode, Result};

/// Default per-activation timeout in seconds
pub const DEFAULT_EXECUTION_TIMEOUT: u64 = 1800;

/// Default bucket for job artifacts
pub const DEFAULT_STORAGE_BUCKET: &str = "compute-mcp-data";

/// Deep-merge `overlay` into `base`: objects merge key by key, anything else replaces
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Mutable access to a top-level section, creating it when missing
pub fn section_mut<'a>(config: &'a mut Value, name: &str) -> Result<&'a mut Map<String, Value>> {
    let root = config.as_object_mut().ok_or_else(|| {
        ComputeError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            "configuration root must be a mapping",
        )
    })?;
    let section = root
        .entry(name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if section.is_null() {
        *section = Value::Object(Map::new());
    }
    section.as_object_mut().ok_or_else(|| {
        ComputeError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!("section '{}' must be a mapping", name),
        )
    })
}

/// Deserialize a top-level section, using defaults when it is absent
pub fn section<T>(config: &Value, name: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match config.get(name) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ComputeError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("invalid '{}' section: {}", name, e),
            )
            .with_source(e)
        }),
    }
}

/// The `compute` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeSection {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub monitoring: Option<String>,
    /// Absent keeps the server's level; `null` silences executor logs
    #[serde(default, deserialize_with = "deserialize_present")]
    pub log_level: Option<Option<String>>,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout: u64,
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,
}

impl Default for ComputeSection {
    fn default() -> Self {
        Self {
            mode: None,
            backend: None,
            storage: None,
            monitoring: None,
            log_level: None,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            storage_bucket: default_storage_bucket(),
        }
    }
}

fn default_execution_timeout() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT
}

fn default_storage_bucket() -> String {
    DEFAULT_STORAGE_BUCKET.to_string()
}

fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// The `localhost` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalhostSection {
    /// Worker slots; defaults to the available parallelism
    #[serde(default)]
    pub worker_processes: Option<usize>,
    /// Root directory of the `localhost` storage backend
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
}

/// A compute backend section (`aws_lambda`, `aws_ec2`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub worker_processes: Option<usize>,
    /// Default runtime memory in MB
    #[serde(default)]
    pub runtime_memory: Option<u32>,
    /// Everything else in the section, kept for reporting
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `rabbitmq` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RabbitmqSection {
    #[serde(default)]
    pub amqp_url: Option<String>,
}

/// Default storage root when none is configured
pub fn default_storage_root() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("storage"))
        .unwrap_or_else(|| std::env::temp_dir().join("compute-mcp").join("storage"))
}
