//! # compute-mcp
//!
//! A Model Context Protocol tool server for distributed-style compute jobs.
//!
//! ## Usage
//!
//! ```bash
//! compute-mcp serve --port 8080
//! compute-mcp call map --args '{"name_func": "add", "map_iterdata": [[2], [3]], "tuple_list": true, "args": {"extra_args": [10]}}'
//! ```
//!
//! ## Modules
//!
//! - `config` - YAML executor configuration and its lookup chain
//! - `error` - Unified error type with numeric codes
//! - `executor` - The `Executor` contract, futures and the in-process executor
//! - `jobs` - Normalization of job submission arguments
//! - `ledger` - Future ledger and its slice-based selection
//! - `logging` - Tracing setup with runtime log-level control
//! - `mcp` - JSON-RPC framing, tool catalog and HTTP transport
//! - `registry` - Named functions that jobs can run
//! - `session` - Per-client executor handle and ledger
//! - `storage` - Object storage for job artifacts and data objects
pub mod config;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod ledger;
pub mod logging;
pub mod mcp;
pub mod registry;
pub mod session;
pub mod storage;

pub use error::{ComputeError, ErrorCode, Result};
