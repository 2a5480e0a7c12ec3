//! Model Context Protocol surface
//!
//! [`handle_request`] answers one JSON-RPC request for a session;
//! [`server`] carries it over HTTP.

pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{router, serve, AppState, SESSION_HEADER};
pub use tools::{call_tool, catalog, ToolDefinition};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{describe_error_code, ComputeError};
use crate::session::Session;
use protocol::{INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION};

/// Name reported in `initialize`
pub const SERVER_NAME: &str = "compute-mcp";

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Wrap a tool outcome as an MCP tool result
pub fn tool_result(outcome: Result<Value, ComputeError>) -> Value {
    match outcome {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            let mut result = json!({
                "content": [{"type": "text", "text": text}],
                "isError": false
            });
            if value.is_object() {
                result["structuredContent"] = value;
            }
            result
        }
        Err(e) => {
            debug!("{}", e.developer_message());
            json!({
                "content": [{"type": "text", "text": e.user_message()}],
                "structuredContent": {
                    "error": {
                        "code": e.code(),
                        "category": e.category(),
                        "description": describe_error_code(e.code()),
                        "message": e.to_string()
                    }
                },
                "isError": true
            })
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {"tools": {"listChanged": false}},
        "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        "instructions": "Configure an executor with one of the *_executor tools, submit jobs with call_async, map or map_reduce, then manage the returned futures by ledger index with get_result, wait, clean and plot."
    })
}

/// Answer one request; notifications yield `None`
pub async fn handle_request(session: &Session, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let Some(id) = request.id.clone() else {
        debug!("Notification {}", request.method);
        return None;
    };

    let outcome: Result<Value, JsonRpcError> = match request.method.as_str() {
        "initialize" => Ok(initialize_result()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": catalog() })),
        "tools/call" => call(session, request.params).await,
        other => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
        )),
    };

    Some(match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    })
}

async fn call(session: &Session, params: Option<Value>) -> Result<Value, JsonRpcError> {
    let params: ToolCallParams = serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid tools/call params: {}", e)))?;
    if !tools::is_known(&params.name) {
        return Err(JsonRpcError::new(
            INVALID_PARAMS,
            format!("Unknown tool: {}", params.name),
        ));
    }

    debug!("Session {}: calling tool {}", session.id(), params.name);
    let outcome = call_tool(session, &params.name, params.arguments).await;
    if let Err(e) = &outcome {
        warn!("Tool {} failed: {}", params.name, e);
    }
    Ok(tool_result(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::logging;
    use crate::registry::FunctionRegistry;
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(
            "rpc",
            Arc::new(FunctionRegistry::with_builtins()),
            Arc::new(ConfigLoader::explicit_only()),
            logging::detached(),
        )
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = handle_request(&session(), JsonRpcRequest::new(1, "resources/list", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let request = JsonRpcRequest::new(
            2,
            "tools/call",
            Some(json!({"name": "nope", "arguments": {}})),
        );
        let response = handle_request(&session(), request).await.unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tool_failure_is_error_result() {
        let request = JsonRpcRequest::new(
            3,
            "tools/call",
            Some(json!({"name": "job_summary", "arguments": {}})),
        );
        let response = handle_request(&session(), request).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("no executor configured"));
        assert_eq!(result["structuredContent"]["error"]["category"], "config");
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let request = JsonRpcRequest {
            id: None,
            ..JsonRpcRequest::new(0, "notifications/initialized", None)
        };
        assert!(handle_request(&session(), request).await.is_none());
    }
}
