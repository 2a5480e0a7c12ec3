//! Job submission layer
//!
//! Turns the raw arguments of the `call_async`, `map` and `map_reduce`
//! tools into typed executor requests: functions are resolved in the
//! registry, rows go through tuple conversion and options are merged with
//! their defaults.

pub mod args;
pub mod options;

pub use options::{CallAsyncOptions, Field, MapOptions, MapReduceOptions};

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ComputeError, ErrorCode, Result};
use crate::executor::{
    CallAsyncRequest, JobSettings, MapReduceRequest, MapRequest, ObjectPartitioning,
};
use crate::registry::FunctionRegistry;

/// Default percentage of settled maps before the reducer is spawned
pub const DEFAULT_SPAWN_REDUCER: u8 = 20;

/// Arguments of the `call_async` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallAsyncParams {
    #[serde(alias = "function")]
    pub name_func: String,
    pub data: Value,
    #[serde(default)]
    pub tuple_list: bool,
    #[serde(default)]
    pub args: CallAsyncOptions,
}

/// Arguments of the `map` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapParams {
    #[serde(alias = "function")]
    pub name_func: String,
    pub map_iterdata: Vec<Value>,
    #[serde(default)]
    pub tuple_list: Option<bool>,
    #[serde(default)]
    pub args: MapOptions,
}

/// Arguments of the `map_reduce` tool
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapReduceParams {
    pub map_func_name: String,
    pub map_iterdata: Vec<Value>,
    pub reduce_func_name: String,
    #[serde(default)]
    pub tuple_list: Option<bool>,
    #[serde(default)]
    pub args: MapReduceOptions,
}

fn timeout(field: Field<f64>) -> Result<Option<Duration>> {
    let Some(seconds) = field.value() else {
        return Ok(None);
    };
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
        .map(Some)
        .ok_or_else(|| {
            ComputeError::validation_with_code(
                ErrorCode::VALIDATION_OUT_OF_RANGE,
                format!("timeout must be a positive number of seconds, got {}", seconds),
                Some("timeout".to_string()),
            )
        })
}

fn chunksize(field: Field<usize>) -> Result<Option<usize>> {
    match field.value() {
        Some(0) => Err(ComputeError::validation_with_code(
            ErrorCode::VALIDATION_OUT_OF_RANGE,
            "chunksize must be at least 1",
            Some("chunksize".to_string()),
        )),
        other => Ok(other),
    }
}

fn job_settings(
    timeout_field: Field<f64>,
    extra_env: Field<HashMap<String, String>>,
    runtime_memory: Field<u32>,
    include_modules: Field<Vec<String>>,
    exclude_modules: Field<Vec<String>>,
) -> Result<JobSettings> {
    Ok(JobSettings {
        timeout: timeout(timeout_field)?,
        extra_env: extra_env.value().unwrap_or_default(),
        runtime_memory: runtime_memory.value(),
        // Unset means "everything"; an explicit null means "nothing"
        include_modules: include_modules.or_default_value(Vec::new()),
        exclude_modules: exclude_modules.value().unwrap_or_default(),
    })
}

fn partitioning(
    chunk_size: Field<u64>,
    chunk_number: Field<u32>,
    newline: Field<String>,
) -> ObjectPartitioning {
    ObjectPartitioning {
        chunk_size: chunk_size.value(),
        chunk_number: chunk_number.value(),
        newline: newline.or_default_value("\n".to_string()),
    }
}

/// Build a call-async request
pub fn prepare_call_async(
    registry: &FunctionRegistry,
    params: CallAsyncParams,
) -> Result<CallAsyncRequest> {
    let function = registry.resolve(&params.name_func)?;
    let options = params.args;
    Ok(CallAsyncRequest {
        function,
        row: args::to_row(params.data, params.tuple_list),
        settings: job_settings(
            options.timeout,
            options.extra_env,
            options.runtime_memory,
            options.include_modules,
            options.exclude_modules,
        )?,
    })
}

/// Build a map request
pub fn prepare_map(registry: &FunctionRegistry, params: MapParams) -> Result<MapRequest> {
    let function = registry.resolve(&params.name_func)?;
    let tuple_list = params.tuple_list.unwrap_or(false);
    let options = params.args;
    Ok(MapRequest {
        function,
        rows: args::to_rows(params.map_iterdata, tuple_list),
        extra_args: args::extra_field(options.extra_args, tuple_list, "extra_args")?,
        chunksize: chunksize(options.chunksize)?,
        objects: partitioning(
            options.obj_chunk_size,
            options.obj_chunk_number,
            options.obj_newline,
        ),
        settings: job_settings(
            options.timeout,
            options.extra_env,
            options.runtime_memory,
            options.include_modules,
            options.exclude_modules,
        )?,
    })
}

/// Build a map-reduce request
pub fn prepare_map_reduce(
    registry: &FunctionRegistry,
    params: MapReduceParams,
) -> Result<MapReduceRequest> {
    let map_function = registry.resolve(&params.map_func_name)?;
    let reduce_function = registry.resolve(&params.reduce_func_name)?;
    let tuple_list = params.tuple_list.unwrap_or(false);
    let options = params.args;

    // Keyword rows keep a sequence of extras unconverted, which the executor rejects
    let first_is_mapping = matches!(params.map_iterdata.first(), Some(Value::Object(_)));
    let extra_args = args::extra_field(options.extra_args, !first_is_mapping, "extra_args")?;
    let extra_args_reduce =
        args::extra_field(options.extra_args_reduce, true, "extra_args_reduce")?;

    let spawn_reducer = options
        .spawn_reducer
        .value()
        .unwrap_or(DEFAULT_SPAWN_REDUCER);
    if spawn_reducer > 100 {
        return Err(ComputeError::validation_with_code(
            ErrorCode::VALIDATION_OUT_OF_RANGE,
            format!("spawn_reducer must be a percentage, got {}", spawn_reducer),
            Some("spawn_reducer".to_string()),
        ));
    }

    Ok(MapReduceRequest {
        map_function,
        reduce_function,
        rows: args::to_rows(params.map_iterdata, tuple_list),
        extra_args,
        extra_args_reduce,
        chunksize: chunksize(options.chunksize)?,
        objects: partitioning(
            options.obj_chunk_size,
            options.obj_chunk_number,
            options.obj_newline,
        ),
        reduce_by_key: options.obj_reduce_by_key.value().unwrap_or(false),
        spawn_reducer,
        settings: job_settings(
            options.timeout,
            options.extra_env,
            options.map_runtime_memory,
            options.include_modules,
            options.exclude_modules,
        )?,
        reduce_runtime_memory: options.reduce_runtime_memory.value(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{DataRow, ExtraArgs};
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    #[test]
    fn test_map_params_with_tuple_list() {
        let params: MapParams = serde_json::from_value(json!({
            "name_func": "add",
            "map_iterdata": [[2], [3], [4]],
            "tuple_list": true,
            "args": {"extra_args": [10], "timeout": 5}
        }))
        .unwrap();
        let request = prepare_map(&registry(), params).unwrap();

        assert_eq!(request.rows[0], DataRow::Tuple(vec![json!(2)]));
        assert_eq!(request.extra_args, Some(ExtraArgs::Tuple(vec![json!(10)])));
        assert_eq!(request.settings.timeout, Some(Duration::from_secs(5)));
        assert_eq!(request.objects.newline.as_deref(), Some("\n"));
        assert_eq!(request.settings.include_modules, Some(vec![]));
    }

    #[test]
    fn test_map_without_flag_keeps_sequences() {
        let params: MapParams = serde_json::from_value(json!({
            "name_func": "identity",
            "map_iterdata": [[1, 2]],
            "args": {"extra_args": [10], "obj_newline": null, "include_modules": null}
        }))
        .unwrap();
        let request = prepare_map(&registry(), params).unwrap();

        assert_eq!(request.rows[0], DataRow::Single(json!([1, 2])));
        assert_eq!(request.extra_args, Some(ExtraArgs::Sequence(vec![json!(10)])));
        assert_eq!(request.objects.newline, None);
        assert_eq!(request.settings.include_modules, None);
    }

    #[test]
    fn test_call_async_mapping_data() {
        let params: CallAsyncParams = serde_json::from_value(json!({
            "name_func": "sum_list",
            "data": {"list_of_numbers": [1, 2, 3, 4, 5], "x": 3},
            "tuple_list": false,
            "args": {"timeout": 10}
        }))
        .unwrap();
        let request = prepare_call_async(&registry(), params).unwrap();
        assert!(request.row.is_mapping());
    }

    #[test]
    fn test_unknown_function_is_resolution_error() {
        let params: CallAsyncParams =
            serde_json::from_value(json!({"name_func": "nope", "data": 1})).unwrap();
        let err = prepare_call_async(&registry(), params).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RESOLUTION_FUNCTION_NOT_FOUND);
    }

    #[test]
    fn test_map_reduce_extra_args_conversion() {
        let params: MapReduceParams = serde_json::from_value(json!({
            "map_func_name": "increment",
            "map_iterdata": [1, 2, 3],
            "reduce_func_name": "reduce_sum",
            "args": {"extra_args": [7], "extra_args_reduce": []}
        }))
        .unwrap();
        let request = prepare_map_reduce(&registry(), params).unwrap();
        assert_eq!(request.extra_args, Some(ExtraArgs::Tuple(vec![json!(7)])));
        assert_eq!(request.extra_args_reduce, Some(ExtraArgs::Tuple(vec![])));
        assert_eq!(request.spawn_reducer, DEFAULT_SPAWN_REDUCER);

        let params: MapReduceParams = serde_json::from_value(json!({
            "map_func_name": "increment",
            "map_iterdata": [{"x": 1}],
            "reduce_func_name": "reduce_sum",
            "args": {"extra_args": [7]}
        }))
        .unwrap();
        let request = prepare_map_reduce(&registry(), params).unwrap();
        assert_eq!(request.extra_args, Some(ExtraArgs::Sequence(vec![json!(7)])));
    }

    #[test]
    fn test_option_validation() {
        let err = serde_json::from_value::<MapParams>(json!({
            "name_func": "add",
            "map_iterdata": [],
            "args": {"reduce_by_key": true}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown field"));

        let params: MapParams = serde_json::from_value(json!({
            "name_func": "add",
            "map_iterdata": [],
            "args": {"timeout": -1.0}
        }))
        .unwrap();
        let err = prepare_map(&registry(), params).unwrap_err();
        assert_eq!(err.code(), ErrorCode::VALIDATION_OUT_OF_RANGE);

        let params: MapReduceParams = serde_json::from_value(json!({
            "map_func_name": "identity",
            "map_iterdata": [1],
            "reduce_func_name": "reduce_sum",
            "args": {"spawn_reducer": 150}
        }))
        .unwrap();
        assert!(prepare_map_reduce(&registry(), params).is_err());
    }
}
