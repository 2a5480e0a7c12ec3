use compute_mcp::config::ConfigLoader;
use compute_mcp::logging;
use compute_mcp::mcp::{server, SESSION_HEADER};
use compute_mcp::registry::FunctionRegistry;
use compute_mcp::session::SessionManager;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::with_idle_timeout(None).await
    }

    async fn with_idle_timeout(idle: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions = Arc::new(
            SessionManager::new(
                Arc::new(FunctionRegistry::with_builtins()),
                ConfigLoader::explicit_only(),
                logging::detached(),
            )
            .with_idle_timeout(idle),
        );
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server::serve_with_shutdown(listener, sessions, async move {
                let _ = stopped.await;
            })
            .await
            .unwrap();
        });
        Self {
            addr,
            stop: Some(stop),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap();
    }
}

fn rpc(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

async fn post(
    client: &Client,
    server: &TestServer,
    session: Option<&str>,
    body: Value,
) -> reqwest::Response {
    let mut request = client.post(server.url("/mcp")).json(&body);
    if let Some(session) = session {
        request = request.header(SESSION_HEADER, session);
    }
    request.send().await.unwrap()
}

async fn call_tool(
    client: &Client,
    server: &TestServer,
    session: &str,
    name: &str,
    arguments: Value,
) -> Value {
    let response = post(
        client,
        server,
        Some(session),
        rpc(7, "tools/call", json!({"name": name, "arguments": arguments})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["result"].clone()
}

fn text_json(result: &Value) -> Value {
    serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap()
}

async fn initialize(client: &Client, server: &TestServer) -> String {
    let response = post(client, server, None, rpc(1, "initialize", json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = response
        .headers()
        .get(SESSION_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["serverInfo"]["name"], "compute-mcp");
    session
}

#[tokio::test]
async fn test_initialize_and_list_tools() {
    let server = TestServer::start().await;
    let client = Client::new();
    let session = initialize(&client, &server).await;

    let response = post(&client, &server, Some(&session), rpc(2, "tools/list", json!({}))).await;
    let body: Value = response.json().await.unwrap();
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 15);
    for expected in ["localhost_executor", "map_reduce", "delete_from_future", "list_functions"] {
        assert!(names.contains(&expected), "missing {}", expected);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_map_and_get_result_over_http() {
    let server = TestServer::start().await;
    let client = Client::new();
    let session = initialize(&client, &server).await;

    let configured = call_tool(
        &client,
        &server,
        &session,
        "localhost_executor",
        json!({"args": {"storage": "memory"}}),
    )
    .await;
    assert_eq!(configured["isError"], false);
    assert!(configured["structuredContent"]["executor_id"].is_string());

    let mapped = call_tool(
        &client,
        &server,
        &session,
        "map",
        json!({
            "name_func": "add",
            "map_iterdata": [[2], [3], [4]],
            "tuple_list": true,
            "args": {"extra_args": [10]}
        }),
    )
    .await;
    assert_eq!(mapped["isError"], false);
    let ledger = text_json(&mapped);
    assert_eq!(ledger.as_array().unwrap().len(), 1);

    let results = call_tool(
        &client,
        &server,
        &session,
        "get_result",
        json!({"args": {"show_progressbar": false, "wait_dur_sec": 0.01, "timeout": 20}}),
    )
    .await;
    assert_eq!(results["isError"], false);
    assert_eq!(text_json(&results), json!([12, 13, 14]));

    server.stop().await;
}

#[tokio::test]
async fn test_tool_errors_are_results() {
    let server = TestServer::start().await;
    let client = Client::new();
    let session = initialize(&client, &server).await;

    let result = call_tool(
        &client,
        &server,
        &session,
        "call_async",
        json!({"name_func": "identity", "data": 1}),
    )
    .await;
    assert_eq!(result["isError"], true);
    assert_eq!(result["structuredContent"]["error"]["category"], "config");

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let server = TestServer::start().await;
    let client = Client::new();

    let response = post(
        &client,
        &server,
        Some("no-such-session"),
        rpc(3, "tools/list", json!({})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_delete_closes_session() {
    let server = TestServer::start().await;
    let client = Client::new();
    let session = initialize(&client, &server).await;

    let response = client
        .delete(server.url("/mcp"))
        .header(SESSION_HEADER, &session)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let again = post(&client, &server, Some(&session), rpc(4, "ping", json!({}))).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let missing = client.delete(server.url("/mcp")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    server.stop().await;
}

#[tokio::test]
async fn test_health_and_malformed_body() {
    let server = TestServer::start().await;
    let client = Client::new();

    let health: Value = client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let response = client
        .post(server.url("/mcp"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    let notification = post(
        &client,
        &server,
        None,
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    )
    .await;
    assert_eq!(notification.status(), StatusCode::ACCEPTED);

    server.stop().await;
}

#[tokio::test]
async fn test_idle_session_expires() {
    let server = TestServer::with_idle_timeout(Some(Duration::from_millis(100))).await;
    let client = Client::new();
    let session = initialize(&client, &server).await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let response = post(&client, &server, Some(&session), rpc(5, "ping", json!({}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let default = post(&client, &server, None, rpc(6, "ping", json!({}))).await;
    assert_eq!(default.status(), StatusCode::OK);

    server.stop().await;
}
