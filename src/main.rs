use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

use compute_mcp::config::ConfigLoader;
use compute_mcp::error::ComputeError;
use compute_mcp::mcp::{self, JsonRpcRequest, JsonRpcResponse, SESSION_HEADER};
use compute_mcp::registry::FunctionRegistry;
use compute_mcp::session::SessionManager;

/// MCP tool server for map, map-reduce and asynchronous compute jobs
#[derive(Parser)]
#[command(name = "compute-mcp", version)]
#[command(about = "Serve compute jobs as Model Context Protocol tools", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server (default command)
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Only read executor config from explicit paths and COMPUTE_MCP_CONFIG_FILE
        #[arg(long)]
        no_config_search: bool,

        /// Close client sessions idle for this many seconds (0 keeps them)
        #[arg(long, default_value_t = 1800)]
        session_idle_secs: u64,
    },
    /// Print the tool catalog as JSON
    Tools,
    /// Print the registered functions as JSON
    Functions,
    /// Call a tool on a running server
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Read the arguments from a JSON file instead
        #[arg(long, conflicts_with = "args")]
        args_file: Option<PathBuf>,

        /// Server endpoint
        #[arg(long, default_value = "http://127.0.0.1:8080/mcp")]
        url: String,

        /// Session to use; omitted uses the server's default session
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log = compute_mcp::logging::init(cli.verbose);

    debug!("compute-mcp started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Some(Commands::Serve {
            host,
            port,
            no_config_search,
            session_idle_secs,
        }) => run_serve(host, port, no_config_search, session_idle_secs, log).await,
        Some(Commands::Tools) => print_json(&mcp::catalog()),
        Some(Commands::Functions) => print_json(&FunctionRegistry::with_builtins().catalog()),
        Some(Commands::Call {
            tool,
            args,
            args_file,
            url,
            session,
        }) => run_call(&tool, &args, args_file, &url, session).await,
        None => run_serve(IpAddr::from([0, 0, 0, 0]), 8080, false, 1800, log).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<ComputeError>()
            .map(ComputeError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run_serve(
    host: IpAddr,
    port: u16,
    no_config_search: bool,
    session_idle_secs: u64,
    log: compute_mcp::logging::LogControl,
) -> anyhow::Result<()> {
    let registry = Arc::new(FunctionRegistry::with_builtins());
    let loader = if no_config_search {
        ConfigLoader::explicit_only()
    } else {
        ConfigLoader::new()
    };
    let sessions = Arc::new(
        SessionManager::new(registry, loader, log)
            .with_idle_timeout(Some(Duration::from_secs(session_idle_secs))),
    );
    mcp::serve(SocketAddr::new(host, port), sessions)
        .await
        .context("MCP server failed")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_call(
    tool: &str,
    args: &str,
    args_file: Option<PathBuf>,
    url: &str,
    session: Option<String>,
) -> anyhow::Result<()> {
    let raw = match args_file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?,
        None => args.to_string(),
    };
    let arguments: Value = serde_json::from_str(&raw).context("Tool arguments must be JSON")?;
    if !arguments.is_object() {
        bail!("Tool arguments must be a JSON object");
    }

    let client = reqwest::Client::new();
    let request = JsonRpcRequest::new(
        1,
        "tools/call",
        Some(json!({"name": tool, "arguments": arguments})),
    );
    let mut builder = client.post(url).json(&request);
    if let Some(session) = &session {
        builder = builder.header(SESSION_HEADER, session);
    }
    let response = builder
        .send()
        .await
        .with_context(|| format!("Cannot reach {}", url))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Server returned {}: {}", status, body);
    }

    let response: JsonRpcResponse = response.json().await.context("Invalid JSON-RPC response")?;
    if let Some(error) = response.error {
        bail!("JSON-RPC error {}: {}", error.code, error.message);
    }
    let result = response
        .result
        .ok_or_else(|| anyhow!("Response carries neither result nor error"))?;

    let text = result["content"][0]["text"].as_str().unwrap_or_default();
    if result["isError"].as_bool().unwrap_or(false) {
        bail!("{} failed: {}", tool, text);
    }
    println!("{}", text);
    Ok(())
}
