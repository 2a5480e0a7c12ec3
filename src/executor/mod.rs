//! Executors and the futures they produce
//!
//! [`Executor`] is the contract between the session layer and whatever
//! runs activations. [`LocalExecutor`] runs them in-process on a bounded
//! pool of blocking worker threads, emulating the configured execution
//! mode, and keeps every job artifact in object storage.

pub mod future;
pub mod handle;
pub mod local;
pub mod monitor;
pub mod options;
pub mod partitioner;
pub mod plot;
pub mod request;
pub mod summary;

pub use future::{CallId, CallStats, CallStatus, FutureView, ResponseFuture};
pub use handle::{ExecutionMode, ExecutorArgs, ExecutorKind, ExecutorSettings};
pub use local::LocalExecutor;
pub use monitor::MonitoringMode;
pub use options::{CleanOptions, GetResultOptions, PlotOptions, ReturnWhen, WaitOptions};
pub use plot::PlotReport;
pub use request::{
    CallAsyncRequest, DataRow, ExtraArgs, JobSettings, MapReduceRequest, MapRequest,
    ObjectPartitioning,
};
pub use summary::JobSummary;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::ConfigLoader;
use crate::error::Result;

/// Storage prefix of per-job artifacts
pub const JOBS_PREFIX: &str = "jobs";

/// Storage prefix of cached function metadata
pub const FUNCTIONS_PREFIX: &str = "functions";

/// Storage prefix of objects an executor derives from user data
pub const CLOUDOBJECTS_PREFIX: &str = "cloudobjects";

/// Outcome of a wait: the selected futures split by completion
#[derive(Debug, Clone, Default)]
pub struct WaitPartition {
    pub done: Vec<ResponseFuture>,
    pub not_done: Vec<ResponseFuture>,
}

/// What a clean removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanReport {
    pub futures_cleaned: usize,
    /// Unsettled futures left alone because `force` was not set
    pub futures_skipped: usize,
    pub objects_deleted: usize,
    /// Jobs whose whole artifact prefix was removed
    pub jobs_removed: Vec<String>,
}

/// A configured executor
#[async_trait]
pub trait Executor: Send + Sync {
    fn id(&self) -> &str;

    fn settings(&self) -> &ExecutorSettings;

    /// Run one activation
    async fn call_async(&self, request: CallAsyncRequest) -> Result<ResponseFuture>;

    /// Run one activation per row (or object partition)
    async fn map(&self, request: MapRequest) -> Result<Vec<ResponseFuture>>;

    /// Map, then reduce the map results; returns map futures followed by reducers
    async fn map_reduce(&self, request: MapReduceRequest) -> Result<Vec<ResponseFuture>>;

    /// Values of the output-producing futures among `futures`, in order
    async fn get_result(
        &self,
        futures: &[ResponseFuture],
        options: &GetResultOptions,
    ) -> Result<Vec<serde_json::Value>>;

    async fn wait(&self, futures: &[ResponseFuture], options: &WaitOptions)
        -> Result<WaitPartition>;

    async fn clean(&self, futures: &[ResponseFuture], options: &CleanOptions)
        -> Result<CleanReport>;

    async fn plot(&self, futures: &[ResponseFuture], options: &PlotOptions) -> Result<PlotReport>;

    /// Summary of every job this executor ran
    async fn job_summary(&self, cloud_objects_n: Option<u64>) -> Result<JobSummary>;
}

/// Resolve a configuration variant and build its executor
pub async fn create_executor(
    kind: ExecutorKind,
    args: &ExecutorArgs,
    loader: &ConfigLoader,
) -> Result<Arc<dyn Executor>> {
    let settings = handle::resolve(kind, args, loader).await?;
    let executor = LocalExecutor::new(settings).await?;
    Ok(Arc::new(executor))
}
