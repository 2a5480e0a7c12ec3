//! Typed submission requests handed to an executor

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ComputeError, ErrorCode, Result};
use crate::registry::{CallArgs, FunctionSpec};

/// One input row after tuple conversion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DataRow {
    /// Passed as the single positional argument
    Single(Value),
    /// Unpacked into positional arguments
    Tuple(Vec<Value>),
    /// Bound as keyword arguments
    Mapping(Map<String, Value>),
}

/// Additional arguments appended to every activation of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ExtraArgs {
    Tuple(Vec<Value>),
    Mapping(Map<String, Value>),
    /// A sequence that was not converted to a tuple; rejected at submission
    Sequence(Vec<Value>),
}

impl ExtraArgs {
    /// Fail on the unconverted sequence shape
    pub fn validate(&self, field: &str) -> Result<()> {
        match self {
            Self::Sequence(_) => Err(ComputeError::validation_with_code(
                ErrorCode::VALIDATION_INVALID_TYPE,
                format!("{} must contain args in a tuple or a mapping", field),
                Some(field.to_string()),
            )),
            _ => Ok(()),
        }
    }
}

impl DataRow {
    /// Whether the row binds by keyword
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping(_))
    }

    /// The mapping entry at `key`, if the row is a mapping
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    /// Combine the row with the job's extra arguments
    pub fn bind(self, extra: Option<&ExtraArgs>) -> Result<CallArgs> {
        let Some(extra) = extra else {
            return Ok(self.into_args());
        };
        let mut args = self.into_args();
        match extra {
            ExtraArgs::Tuple(values) => args.positional.extend(values.iter().cloned()),
            ExtraArgs::Mapping(values) => {
                for (key, value) in values {
                    args.keyword.insert(key.clone(), value.clone());
                }
            }
            ExtraArgs::Sequence(_) => extra.validate("extra_args")?,
        }
        Ok(args)
    }

    fn into_args(self) -> CallArgs {
        match self {
            Self::Single(value) => CallArgs::positional(vec![value]),
            Self::Tuple(values) => CallArgs::positional(values),
            Self::Mapping(values) => CallArgs::keyword(values),
        }
    }
}

/// Execution settings shared by every activation of a job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSettings {
    /// Per-activation limit; `None` uses the executor's configured timeout
    pub timeout: Option<Duration>,
    pub extra_env: HashMap<String, String>,
    /// Memory in MB; `None` uses the backend default
    pub runtime_memory: Option<u32>,
    /// `None` means explicitly no modules
    pub include_modules: Option<Vec<String>>,
    pub exclude_modules: Vec<String>,
}

/// Object partitioning options of a data-processing job
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPartitioning {
    pub chunk_size: Option<u64>,
    pub chunk_number: Option<u32>,
    /// Boundary character for line integrity; `None` splits at exact offsets
    pub newline: Option<String>,
}

impl Default for ObjectPartitioning {
    fn default() -> Self {
        Self {
            chunk_size: None,
            chunk_number: None,
            newline: Some("\n".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallAsyncRequest {
    pub function: Arc<FunctionSpec>,
    pub row: DataRow,
    pub settings: JobSettings,
}

#[derive(Debug, Clone)]
pub struct MapRequest {
    pub function: Arc<FunctionSpec>,
    pub rows: Vec<DataRow>,
    pub extra_args: Option<ExtraArgs>,
    /// Rows per worker invocation
    pub chunksize: Option<usize>,
    pub objects: ObjectPartitioning,
    pub settings: JobSettings,
}

#[derive(Debug, Clone)]
pub struct MapReduceRequest {
    pub map_function: Arc<FunctionSpec>,
    pub reduce_function: Arc<FunctionSpec>,
    pub rows: Vec<DataRow>,
    pub extra_args: Option<ExtraArgs>,
    pub extra_args_reduce: Option<ExtraArgs>,
    pub chunksize: Option<usize>,
    pub objects: ObjectPartitioning,
    /// One reducer per partitioned object instead of one per job
    pub reduce_by_key: bool,
    /// Percent of settled map activations before the reducer is spawned
    pub spawn_reducer: u8,
    /// Map-phase settings; `runtime_memory` is the map memory
    pub settings: JobSettings,
    pub reduce_runtime_memory: Option<u32>,
}
