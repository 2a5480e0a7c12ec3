//! Response futures
//!
//! A `ResponseFuture` is a cheap, cloneable handle on one activation. It
//! carries its own storage reference so results, statistics and artifacts
//! stay reachable after the executor that created it has been replaced.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::registry::FunctionError;
use crate::storage::ObjectStorage;

use super::JOBS_PREFIX;

/// Seconds since the Unix epoch with microsecond precision
pub fn now_tstamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// `executor_id/job_id/call_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId {
    pub executor_id: String,
    pub job_id: String,
    pub call_id: String,
}

impl CallId {
    pub fn new(executor_id: &str, job_id: &str, index: usize) -> Self {
        Self {
            executor_id: executor_id.to_string(),
            job_id: job_id.to_string(),
            call_id: format!("{:05}", index),
        }
    }

    /// Storage prefix holding every artifact of the job
    pub fn job_prefix(&self) -> String {
        format!("{}/{}/{}/", JOBS_PREFIX, self.executor_id, self.job_id)
    }

    /// Storage prefix holding the artifacts of this call
    pub fn call_prefix(&self) -> String {
        format!("{}{}/", self.job_prefix(), self.call_id)
    }

    pub fn output_key(&self) -> String {
        format!("{}output.json", self.call_prefix())
    }

    pub fn status_key(&self) -> String {
        format!("{}status.json", self.call_prefix())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.executor_id, self.job_id, self.call_id)
    }
}

/// Lifecycle of one activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Created, not yet handed to a worker
    New,
    /// Handed to a worker slot
    Invoked,
    /// Function body executing
    Running,
    /// Finished, output stored but not downloaded
    Success,
    /// Raised an error or timed out
    Error,
    /// Output downloaded into the future
    Done,
}

impl CallStatus {
    /// Whether the activation reached a final state
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Done)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Invoked => "invoked",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Execution statistics accumulated over an activation's lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_submit_tstamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_invoked_tstamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_start_tstamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_end_tstamp: Option<f64>,
    /// Seconds spent inside the function body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_func_exec_time: Option<f64>,
    /// Seconds between worker start and end, including storage writes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_exec_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_status_done_tstamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_result_done_tstamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_memory: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_size: Option<u64>,
}

struct FutureRecord {
    stats: CallStats,
    error: Option<FunctionError>,
    result: Option<Value>,
    cleaned: bool,
}

struct FutureInner {
    id: CallId,
    function: String,
    produce_output: bool,
    partition_key: Option<String>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    status: watch::Sender<CallStatus>,
    record: Mutex<FutureRecord>,
}

/// Handle on the eventual result of one activation
#[derive(Clone)]
pub struct ResponseFuture {
    inner: Arc<FutureInner>,
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.inner.id.to_string())
            .field("function", &self.inner.function)
            .field("status", &self.status())
            .finish()
    }
}

impl PartialEq for ResponseFuture {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ResponseFuture {}

impl ResponseFuture {
    pub fn new(
        id: CallId,
        function: impl Into<String>,
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
    ) -> Self {
        let (status, _) = watch::channel(CallStatus::New);
        Self {
            inner: Arc::new(FutureInner {
                id,
                function: function.into(),
                produce_output: true,
                partition_key: None,
                storage,
                bucket: bucket.into(),
                status,
                record: Mutex::new(FutureRecord {
                    stats: CallStats {
                        host_submit_tstamp: Some(now_tstamp()),
                        ..CallStats::default()
                    },
                    error: None,
                    result: None,
                    cleaned: false,
                }),
            }),
        }
    }

    /// Mark as internal to a job (map futures of a map-reduce job)
    pub fn without_output(mut self) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.produce_output = false;
        }
        self
    }

    /// Attach the object key the activation was partitioned from
    pub fn with_partition_key(mut self, key: Option<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.partition_key = key;
        }
        self
    }

    fn record(&self) -> MutexGuard<'_, FutureRecord> {
        self.inner
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &CallId {
        &self.inner.id
    }

    pub fn function(&self) -> &str {
        &self.inner.function
    }

    /// Whether `get_result` returns a value for this future
    pub fn produces_output(&self) -> bool {
        self.inner.produce_output
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.inner.partition_key.as_deref()
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.inner.storage
    }

    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    pub fn status(&self) -> CallStatus {
        *self.inner.status.borrow()
    }

    pub fn is_settled(&self) -> bool {
        self.status().is_settled()
    }

    pub fn is_cleaned(&self) -> bool {
        self.record().cleaned
    }

    /// Snapshot of the accumulated statistics
    pub fn stats(&self) -> CallStats {
        self.record().stats.clone()
    }

    /// Error raised inside the activation, if it failed
    pub fn error(&self) -> Option<FunctionError> {
        self.record().error.clone()
    }

    /// Result already downloaded into the future
    pub fn cached_result(&self) -> Option<Value> {
        self.record().result.clone()
    }

    pub fn mark_invoked(&self, worker_id: usize, runtime_memory: Option<u32>) {
        {
            let mut record = self.record();
            record.stats.worker_invoked_tstamp = Some(now_tstamp());
            record.stats.worker_id = Some(worker_id);
            record.stats.runtime_memory = runtime_memory;
        }
        self.inner.status.send_replace(CallStatus::Invoked);
    }

    pub fn mark_running(&self) {
        self.record().stats.worker_start_tstamp = Some(now_tstamp());
        self.inner.status.send_replace(CallStatus::Running);
    }

    /// Settle successfully; the output lives in storage until downloaded
    pub fn settle_success(&self, func_exec_time: f64, result_size: u64) {
        self.finish(func_exec_time, |record| {
            record.stats.result_size = Some(result_size);
        });
        self.inner.status.send_replace(CallStatus::Success);
    }

    pub fn settle_error(&self, func_exec_time: f64, error: FunctionError) {
        self.finish(func_exec_time, |record| record.error = Some(error));
        self.inner.status.send_replace(CallStatus::Error);
    }

    fn finish(&self, func_exec_time: f64, apply: impl FnOnce(&mut FutureRecord)) {
        let now = now_tstamp();
        let mut record = self.record();
        let start = record.stats.worker_start_tstamp.unwrap_or(now);
        record.stats.worker_end_tstamp = Some(now);
        record.stats.worker_exec_time = Some(now - start);
        record.stats.worker_func_exec_time = Some(func_exec_time);
        record.stats.host_status_done_tstamp = Some(now);
        apply(&mut record);
    }

    /// Store a downloaded result and move to `done`
    pub fn set_result(&self, value: Value) {
        {
            let mut record = self.record();
            record.result = Some(value);
            record.stats.host_result_done_tstamp = Some(now_tstamp());
        }
        self.inner.status.send_replace(CallStatus::Done);
    }

    pub fn mark_cleaned(&self) {
        self.record().cleaned = true;
    }

    /// Resolve once the activation settles
    pub async fn wait_settled(&self) {
        let mut rx = self.inner.status.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here
        let _ = rx.wait_for(|status| status.is_settled()).await;
    }

    /// Serializable summary used in ledger views
    pub fn view(&self) -> FutureView {
        FutureView {
            call_id: self.inner.id.to_string(),
            function: self.inner.function.clone(),
            status: self.status(),
            produces_output: self.inner.produce_output,
        }
    }
}

/// Serializable summary of a future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureView {
    pub call_id: String,
    pub function: String,
    pub status: CallStatus,
    pub produces_output: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backends::MemoryBackend;

    fn future(index: usize) -> ResponseFuture {
        ResponseFuture::new(
            CallId::new("exec", "M000", index),
            "add",
            Arc::new(MemoryBackend::new()),
            "bucket",
        )
    }

    #[test]
    fn test_call_id_layout() {
        let id = CallId::new("a1b2", "M003", 7);
        assert_eq!(id.to_string(), "a1b2/M003/00007");
        assert_eq!(id.output_key(), "jobs/a1b2/M003/00007/output.json");
        assert_eq!(id.job_prefix(), "jobs/a1b2/M003/");
    }

    #[test]
    fn test_lifecycle_updates_stats() {
        let f = future(0);
        assert_eq!(f.status(), CallStatus::New);
        assert!(f.stats().host_submit_tstamp.is_some());

        f.mark_invoked(2, Some(256));
        f.mark_running();
        f.settle_success(0.01, 2);

        assert!(f.is_settled());
        let stats = f.stats();
        assert_eq!(stats.worker_id, Some(2));
        assert_eq!(stats.runtime_memory, Some(256));
        assert_eq!(stats.result_size, Some(2));
        assert!(stats.worker_end_tstamp >= stats.worker_start_tstamp);

        f.set_result(serde_json::json!(12));
        assert_eq!(f.status(), CallStatus::Done);
        assert_eq!(f.cached_result(), Some(serde_json::json!(12)));
    }

    #[test]
    fn test_builders_apply_before_sharing() {
        let f = future(1).without_output().with_partition_key(Some("b/k".into()));
        assert!(!f.produces_output());
        assert_eq!(f.partition_key(), Some("b/k"));
    }

    #[tokio::test]
    async fn test_wait_settled_wakes_on_error() {
        let f = future(3);
        let waiter = {
            let f = f.clone();
            tokio::spawn(async move { f.wait_settled().await })
        };
        f.mark_running();
        f.settle_error(0.0, FunctionError::value_error("bad"));
        waiter.await.unwrap();
        assert_eq!(f.error().unwrap().kind, "ValueError");
    }
}
