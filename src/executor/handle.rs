//! Executor configuration variants and settings resolution
//!
//! Resolution order, lowest to highest precedence: config file, the
//! `config` overrides, explicit tool arguments, then `kwargs` merged into
//! the compute backend section.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use super::monitor::MonitoringMode;
use crate::config::loader::load_yaml;
use crate::config::{
    default_storage_root, merge_values, section, section_mut, BackendSection, ComputeSection,
    ConfigLoader, LocalhostSection, RabbitmqSection,
};
use crate::error::{ComputeError, ErrorCode, Result};
use crate::jobs::Field;
use crate::storage::{BackendType, StorageConfig};

/// Default worker count of serverless backends
pub const DEFAULT_SERVERLESS_WORKERS: usize = 1000;

/// Default VM count of standalone backends
pub const DEFAULT_STANDALONE_WORKERS: usize = 100;

/// The four configuration tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Generic,
    Localhost,
    Serverless,
    Standalone,
}

impl ExecutorKind {
    /// Mode fixed by the variant, if any
    fn fixed_mode(self) -> Option<ExecutionMode> {
        match self {
            Self::Generic => None,
            Self::Localhost => Some(ExecutionMode::Localhost),
            Self::Serverless => Some(ExecutionMode::Serverless),
            Self::Standalone => Some(ExecutionMode::Standalone),
        }
    }

    /// Reject arguments the variant does not accept
    pub fn validate(self, args: &ExecutorArgs) -> Result<()> {
        let unsupported = |option: &str| {
            Err(ComputeError::config_with_code(
                ErrorCode::CONFIG_UNSUPPORTED_OPTION,
                format!("{} executor does not accept '{}'", self, option),
            ))
        };
        if self != Self::Generic && args.mode.is_given() {
            return unsupported("mode");
        }
        if self == Self::Localhost && args.backend.is_given() {
            return unsupported("backend");
        }
        Ok(())
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => write!(f, "function"),
            Self::Localhost => write!(f, "localhost"),
            Self::Serverless => write!(f, "serverless"),
            Self::Standalone => write!(f, "standalone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Localhost,
    Serverless,
    Standalone,
}

impl ExecutionMode {
    /// Compute backend used when none is configured
    pub fn default_backend(self) -> &'static str {
        match self {
            Self::Localhost => "localhost",
            Self::Serverless => "aws_lambda",
            Self::Standalone => "aws_ec2",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "localhost" => Ok(Self::Localhost),
            "serverless" => Ok(Self::Serverless),
            "standalone" => Ok(Self::Standalone),
            other => Err(ComputeError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!(
                    "unknown execution mode '{}' (expected localhost, serverless or standalone)",
                    other
                ),
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Localhost => write!(f, "localhost"),
            Self::Serverless => write!(f, "serverless"),
            Self::Standalone => write!(f, "standalone"),
        }
    }
}

/// Arguments of the configuration tools
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorArgs {
    #[serde(default)]
    pub mode: Field<String>,
    #[serde(default)]
    pub config: Field<Map<String, Value>>,
    #[serde(default)]
    pub config_file: Field<PathBuf>,
    #[serde(default)]
    pub backend: Field<String>,
    #[serde(default)]
    pub storage: Field<String>,
    #[serde(default)]
    pub monitoring: Field<String>,
    /// `null` silences executor logs
    #[serde(default)]
    pub log_level: Field<String>,
    #[serde(default)]
    pub kwargs: Field<Map<String, Value>>,
}

/// Fully resolved executor settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorSettings {
    pub kind: ExecutorKind,
    pub mode: ExecutionMode,
    pub backend: String,
    pub storage: StorageConfig,
    pub monitoring: MonitoringMode,
    /// Absent keeps the server level; `Some(None)` silences the crate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<Option<String>>,
    /// Seconds
    pub execution_timeout: u64,
    /// Concurrent worker slots
    pub workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_memory: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amqp_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// The merged configuration document
    pub config: Value,
}

impl ExecutorSettings {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout)
    }
}

fn set_explicit(compute: &mut Map<String, Value>, key: &str, field: &Field<String>) {
    match field {
        Field::Unset => {}
        Field::Null => {
            compute.insert(key.to_string(), Value::Null);
        }
        Field::Value(v) => {
            compute.insert(key.to_string(), Value::String(v.clone()));
        }
    }
}

/// Resolve the settings of an executor variant
pub async fn resolve(
    kind: ExecutorKind,
    args: &ExecutorArgs,
    loader: &ConfigLoader,
) -> Result<ExecutorSettings> {
    kind.validate(args)?;

    let explicit_file = args.config_file.as_ref().value().map(PathBuf::as_path);
    let config_file = loader.locate(explicit_file)?;
    let mut config = match &config_file {
        Some(path) => load_yaml(path).await?,
        None => Value::Object(Map::new()),
    };
    if let Field::Value(overrides) = &args.config {
        merge_values(&mut config, Value::Object(overrides.clone()));
    }

    {
        let compute = section_mut(&mut config, "compute")?;
        set_explicit(compute, "mode", &args.mode);
        set_explicit(compute, "backend", &args.backend);
        set_explicit(compute, "storage", &args.storage);
        set_explicit(compute, "monitoring", &args.monitoring);
        set_explicit(compute, "log_level", &args.log_level);
    }
    let compute: ComputeSection = section(&config, "compute")?;

    let mode = match (kind.fixed_mode(), &compute.mode) {
        (Some(mode), _) => mode,
        (None, Some(mode)) => mode.parse()?,
        (None, None) => ExecutionMode::default(),
    };
    let backend = match (mode, &compute.backend) {
        (ExecutionMode::Localhost, _) => "localhost".to_string(),
        (_, Some(backend)) => backend.clone(),
        (_, None) => mode.default_backend().to_string(),
    };

    if let Field::Value(kwargs) = &args.kwargs {
        let target = section_mut(&mut config, &backend)?;
        for (key, value) in kwargs {
            target.insert(key.clone(), value.clone());
        }
    }

    let localhost: LocalhostSection = section(&config, "localhost")?;
    let backend_section: BackendSection = section(&config, &backend)?;

    let storage_backend: BackendType = compute
        .storage
        .as_deref()
        .unwrap_or("localhost")
        .parse()?;
    let storage = StorageConfig {
        backend: storage_backend,
        bucket: compute.storage_bucket.clone(),
        root: localhost.storage_root.clone().unwrap_or_else(default_storage_root),
    };

    let monitoring: MonitoringMode = compute.monitoring.as_deref().unwrap_or("storage").parse()?;
    let amqp_url = if monitoring == MonitoringMode::Rabbitmq {
        let rabbitmq: RabbitmqSection = section(&config, "rabbitmq")?;
        Some(rabbitmq.amqp_url.ok_or_else(|| {
            ComputeError::config_with_code(
                ErrorCode::CONFIG_MISSING_REQUIRED,
                "rabbitmq monitoring requires 'amqp_url' in the rabbitmq section",
            )
        })?)
    } else {
        None
    };

    let workers = worker_slots(mode, &localhost, &backend_section)?;
    debug!(
        "Resolved {} executor: mode={} backend={} storage={} workers={}",
        kind, mode, backend, storage.backend, workers
    );

    Ok(ExecutorSettings {
        kind,
        mode,
        backend,
        storage,
        monitoring,
        log_level: compute.log_level.clone(),
        execution_timeout: compute.execution_timeout,
        workers,
        runtime_memory: backend_section.runtime_memory,
        amqp_url,
        config_file,
        config,
    })
}

fn worker_slots(
    mode: ExecutionMode,
    localhost: &LocalhostSection,
    backend: &BackendSection,
) -> Result<usize> {
    let slots = match mode {
        ExecutionMode::Localhost => localhost
            .worker_processes
            .or(backend.worker_processes)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            }),
        ExecutionMode::Serverless => backend.max_workers.unwrap_or(DEFAULT_SERVERLESS_WORKERS),
        ExecutionMode::Standalone => backend
            .max_workers
            .unwrap_or(DEFAULT_STANDALONE_WORKERS)
            .checked_mul(backend.worker_processes.unwrap_or(1))
            .unwrap_or(usize::MAX),
    };
    if slots == 0 || slots > Semaphore::MAX_PERMITS {
        return Err(ComputeError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!(
                "worker count must be within 1..={}, got {}",
                Semaphore::MAX_PERMITS,
                slots
            ),
        ));
    }
    Ok(slots)
}
