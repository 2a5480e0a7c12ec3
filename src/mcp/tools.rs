//! Tool catalog and dispatch onto a session

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ComputeError, ErrorCode, Result};
use crate::executor::{
    CleanOptions, ExecutorArgs, ExecutorKind, GetResultOptions, PlotOptions, WaitOptions,
};
use crate::jobs::{CallAsyncParams, MapParams, MapReduceParams};
use crate::ledger::Selection;
use crate::session::Session;

/// One entry of `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDefinition {
    fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Arguments of the configuration tools
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigureParams {
    #[serde(default)]
    args: ExecutorArgs,
}

/// Arguments shared by the management tools
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, bound(deserialize = "O: Deserialize<'de> + Default"))]
struct ManageParams<O> {
    #[serde(default)]
    args: O,
    /// Address whole batches instead of the flattened futures
    #[serde(default, alias = "response")]
    batch_mode: bool,
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    end: Option<i64>,
}

impl<O> ManageParams<O> {
    fn selection(&self) -> Selection {
        Selection::new(self.start, self.end, self.batch_mode)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobSummaryParams {
    #[serde(default)]
    cloud_objects_n: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteParams {
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    end: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

fn parse<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| {
        ComputeError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_INPUT,
            format!("invalid arguments for {}: {}", tool, e),
            None,
        )
    })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn executor_kind(tool: &str) -> Option<ExecutorKind> {
    match tool {
        "function_executor" => Some(ExecutorKind::Generic),
        "localhost_executor" => Some(ExecutorKind::Localhost),
        "serverless_executor" => Some(ExecutorKind::Serverless),
        "standalone_executor" => Some(ExecutorKind::Standalone),
        _ => None,
    }
}

/// Whether `name` is a tool this server provides
pub fn is_known(name: &str) -> bool {
    catalog().iter().any(|tool| tool.name == name)
}

/// Run a tool against a session and return its JSON result
pub async fn call_tool(session: &Session, name: &str, arguments: Value) -> Result<Value> {
    if let Some(kind) = executor_kind(name) {
        let params: ConfigureParams = parse(name, arguments)?;
        return to_value(&session.configure(kind, params.args).await?);
    }

    match name {
        "call_async" => {
            let params: CallAsyncParams = parse(name, arguments)?;
            to_value(&session.call_async(params).await?)
        }
        "map" => {
            let params: MapParams = parse(name, arguments)?;
            to_value(&session.map(params).await?)
        }
        "map_reduce" => {
            let params: MapReduceParams = parse(name, arguments)?;
            to_value(&session.map_reduce(params).await?)
        }
        "get_result" => {
            let params: ManageParams<GetResultOptions> = parse(name, arguments)?;
            let selection = params.selection();
            session.get_result(selection, params.args).await
        }
        "wait" => {
            let params: ManageParams<WaitOptions> = parse(name, arguments)?;
            let selection = params.selection();
            to_value(&session.wait(selection, params.args).await?)
        }
        "clean" => {
            let params: ManageParams<CleanOptions> = parse(name, arguments)?;
            let selection = params.selection();
            to_value(&session.clean(selection, params.args).await?)
        }
        "plot" => {
            let params: ManageParams<PlotOptions> = parse(name, arguments)?;
            let selection = params.selection();
            session.plot(selection, params.args).await
        }
        "job_summary" => {
            let params: JobSummaryParams = parse(name, arguments)?;
            to_value(&session.job_summary(params.cloud_objects_n).await?)
        }
        "delete_from_future" => {
            let params: DeleteParams = parse(name, arguments)?;
            to_value(&session.delete_from_future(params.start, params.end).await)
        }
        "list_futures" => {
            let _: NoParams = parse(name, arguments)?;
            to_value(&session.list_futures().await)
        }
        "list_functions" => {
            let _: NoParams = parse(name, arguments)?;
            to_value(&session.list_functions())
        }
        other => Err(ComputeError::protocol_with_code(
            ErrorCode::PROTOCOL_UNKNOWN_TOOL,
            format!("unknown tool '{}'", other),
        )),
    }
}

fn nullable(schema: Value) -> Value {
    json!({ "anyOf": [schema, { "type": "null" }] })
}

fn executor_schema(with_mode: bool, with_backend: bool) -> Value {
    let mut properties = json!({
        "config": nullable(json!({
            "type": "object",
            "description": "Settings merged over the configuration file"
        })),
        "config_file": nullable(json!({
            "type": "string",
            "description": "Path to the YAML configuration file"
        })),
        "storage": nullable(json!({
            "type": "string",
            "description": "Storage backend: localhost or memory"
        })),
        "monitoring": nullable(json!({
            "type": "string",
            "enum": ["storage", "rabbitmq"]
        })),
        "log_level": nullable(json!({
            "type": "string",
            "description": "DEBUG, INFO, WARNING, ERROR or CRITICAL; null hides all logs"
        })),
        "kwargs": nullable(json!({
            "type": "object",
            "description": "Options of the compute backend section"
        })),
    });
    if with_mode {
        properties["mode"] = nullable(json!({
            "type": "string",
            "enum": ["localhost", "serverless", "standalone"]
        }));
    }
    if with_backend {
        properties["backend"] = nullable(json!({
            "type": "string",
            "description": "Compute backend section to use"
        }));
    }
    json!({
        "type": "object",
        "properties": {
            "args": {
                "type": "object",
                "properties": properties,
                "additionalProperties": false
            }
        },
        "additionalProperties": false
    })
}

fn common_job_options() -> Value {
    json!({
        "timeout": nullable(json!({"type": "number", "description": "Max seconds per activation"})),
        "extra_env": nullable(json!({
            "type": "object",
            "additionalProperties": {"type": "string"}
        })),
        "include_modules": nullable(json!({"type": "array", "items": {"type": "string"}})),
        "exclude_modules": nullable(json!({"type": "array", "items": {"type": "string"}})),
    })
}

fn object_options(properties: &mut Value) {
    properties["obj_chunk_size"] = nullable(json!({
        "type": "integer",
        "minimum": 1048576,
        "description": "Bytes per object partition"
    }));
    properties["obj_chunk_number"] = nullable(json!({
        "type": "integer",
        "minimum": 1,
        "description": "Partitions per object; wins over obj_chunk_size"
    }));
    properties["obj_newline"] = nullable(json!({
        "type": "string",
        "description": "Line delimiter kept intact across partitions; null splits at exact offsets"
    }));
}

fn data_items() -> Value {
    json!({"description": "A value, a list of positional arguments or a mapping of keyword arguments"})
}

fn call_async_schema() -> Value {
    let mut options = common_job_options();
    options["runtime_memory"] = nullable(json!({"type": "integer", "minimum": 1}));
    json!({
        "type": "object",
        "properties": {
            "name_func": {"type": "string", "description": "Registered function name"},
            "data": data_items(),
            "tuple_list": {"type": "boolean", "default": false},
            "args": {"type": "object", "properties": options, "additionalProperties": false}
        },
        "required": ["name_func", "data"],
        "additionalProperties": false
    })
}

fn map_schema() -> Value {
    let mut options = common_job_options();
    options["extra_args"] = nullable(json!({"type": ["array", "object"]}));
    options["chunksize"] = nullable(json!({"type": "integer", "minimum": 1}));
    options["runtime_memory"] = nullable(json!({"type": "integer", "minimum": 1}));
    object_options(&mut options);
    json!({
        "type": "object",
        "properties": {
            "name_func": {"type": "string", "description": "Registered function name"},
            "map_iterdata": {"type": "array", "items": data_items()},
            "tuple_list": {"type": ["boolean", "null"], "default": false},
            "args": {"type": "object", "properties": options, "additionalProperties": false}
        },
        "required": ["name_func", "map_iterdata"],
        "additionalProperties": false
    })
}

fn map_reduce_schema() -> Value {
    let mut options = common_job_options();
    options["extra_args"] = nullable(json!({"type": ["array", "object"]}));
    options["extra_args_reduce"] = nullable(json!({"type": ["array", "object"]}));
    options["chunksize"] = nullable(json!({"type": "integer", "minimum": 1}));
    options["map_runtime_memory"] = nullable(json!({"type": "integer", "minimum": 1}));
    options["reduce_runtime_memory"] = nullable(json!({"type": "integer", "minimum": 1}));
    options["obj_reduce_by_key"] = nullable(json!({"type": "boolean"}));
    options["spawn_reducer"] = nullable(json!({
        "type": "integer",
        "minimum": 0,
        "maximum": 100,
        "default": 20
    }));
    object_options(&mut options);
    json!({
        "type": "object",
        "properties": {
            "map_func_name": {"type": "string"},
            "map_iterdata": {"type": "array", "items": data_items()},
            "reduce_func_name": {"type": "string"},
            "tuple_list": {"type": ["boolean", "null"], "default": false},
            "args": {"type": "object", "properties": options, "additionalProperties": false}
        },
        "required": ["map_func_name", "map_iterdata", "reduce_func_name"],
        "additionalProperties": false
    })
}

fn manage_schema(options: Value) -> Value {
    json!({
        "type": "object",
        "properties": {
            "args": {"type": "object", "properties": options, "additionalProperties": false},
            "batch_mode": {
                "type": "boolean",
                "default": false,
                "description": "Operate on whole ledger batches instead of the flattened futures"
            },
            "start": {"type": ["integer", "null"], "description": "Slice start; negative counts from the end"},
            "end": {"type": ["integer", "null"], "description": "Slice end (exclusive)"}
        },
        "additionalProperties": false
    })
}

fn wait_options() -> Value {
    json!({
        "throw_except": {"type": "boolean", "default": true},
        "timeout": nullable(json!({"type": "number"})),
        "threadpool_size": {"type": "integer", "minimum": 1},
        "wait_dur_sec": {"type": "number", "default": 1},
        "show_progressbar": {"type": "boolean", "default": true},
    })
}

/// Every tool this server provides
pub fn catalog() -> Vec<ToolDefinition> {
    let mut wait = wait_options();
    wait["return_when"] = json!({
        "description": "ALWAYS, ANY_COMPLETED, ALL_COMPLETED or a completion percentage",
        "anyOf": [
            {"type": "string", "enum": ["ALWAYS", "ANY_COMPLETED", "ALL_COMPLETED"]},
            {"type": "number", "minimum": 0, "maximum": 100}
        ]
    });
    wait["download_results"] = json!({"type": "boolean", "default": false});

    vec![
        ToolDefinition::new(
            "function_executor",
            "Configure an executor whose execution mode is chosen by 'mode' (localhost, serverless or standalone). Replaces the current executor.",
            executor_schema(true, true),
        ),
        ToolDefinition::new(
            "localhost_executor",
            "Configure a localhost executor. Replaces the current executor.",
            executor_schema(false, false),
        ),
        ToolDefinition::new(
            "serverless_executor",
            "Configure a serverless executor. Replaces the current executor.",
            executor_schema(false, true),
        ),
        ToolDefinition::new(
            "standalone_executor",
            "Configure a standalone executor. Replaces the current executor.",
            executor_schema(false, true),
        ),
        ToolDefinition::new(
            "call_async",
            "Run one activation of a registered function. Returns the future ledger.",
            call_async_schema(),
        ),
        ToolDefinition::new(
            "map",
            "Run one activation per item of map_iterdata. Returns the future ledger.",
            map_schema(),
        ),
        ToolDefinition::new(
            "map_reduce",
            "Map a function over map_iterdata and reduce the results. Returns the future ledger.",
            map_reduce_schema(),
        ),
        ToolDefinition::new(
            "get_result",
            "Wait for and return the results of ledger[start:end].",
            manage_schema(wait_options()),
        ),
        ToolDefinition::new(
            "wait",
            "Wait for ledger[start:end] and return the done and not_done futures.",
            manage_schema(wait),
        ),
        ToolDefinition::new(
            "clean",
            "Delete the storage artifacts of ledger[start:end].",
            manage_schema(json!({
                "clean_cloudobjects": {"type": "boolean", "default": true},
                "clean_fn": {"type": "boolean", "default": false},
                "force": {"type": "boolean", "default": false},
                "on_exit": {"type": "boolean", "default": false}
            })),
        ),
        ToolDefinition::new(
            "plot",
            "Render timeline and histogram plots of ledger[start:end] and return their statistics.",
            manage_schema(json!({
                "dst": nullable(json!({"type": "string", "description": "Path prefix of the SVG files"})),
                "figsize": {
                    "type": "array",
                    "items": {"type": "number"},
                    "minItems": 2,
                    "maxItems": 2,
                    "default": [10, 6]
                }
            })),
        ),
        ToolDefinition::new(
            "job_summary",
            "Log and return a summary of every job run by the current executor.",
            json!({
                "type": "object",
                "properties": {
                    "cloud_objects_n": {"type": ["integer", "null"], "minimum": 0}
                },
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            "delete_from_future",
            "Delete ledger[start:end] and return the remaining ledger.",
            json!({
                "type": "object",
                "properties": {
                    "start": {"type": ["integer", "null"]},
                    "end": {"type": ["integer", "null"]}
                },
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            "list_futures",
            "Return the future ledger.",
            json!({"type": "object", "properties": {}, "additionalProperties": false}),
        ),
        ToolDefinition::new(
            "list_functions",
            "Return the registered functions and their parameters.",
            json!({"type": "object", "properties": {}, "additionalProperties": false}),
        ),
    ]
}
