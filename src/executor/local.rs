//! In-process executor
//!
//! Activations run on blocking threads behind a semaphore sized from the
//! execution mode. Outputs and status records are written to object
//! storage; `get_result` downloads them back into the futures.

use async_trait::async_trait;
use futures::stream::{self, FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::future::{CallId, CallStatus, ResponseFuture};
use super::handle::ExecutorSettings;
use super::monitor::{self, WaitSpec};
use super::options::{CleanOptions, GetResultOptions, PlotOptions, WaitOptions};
use super::partitioner::{self, Partition, PlannedRow};
use super::plot::{self, PlotReport};
use super::request::{
    CallAsyncRequest, DataRow, ExtraArgs, JobSettings, MapReduceRequest, MapRequest,
};
use super::summary::{JobKind, JobRecord, JobSummary};
use super::{CleanReport, Executor, WaitPartition, CLOUDOBJECTS_PREFIX, FUNCTIONS_PREFIX};
use crate::error::{ComputeError, ErrorCode, Result};
use crate::registry::{CallArgs, CallContext, FunctionError, FunctionSpec};
use crate::storage::{delete_prefix, put_json, ObjectStorage, StorageError, StorageFactory};

static EXECUTOR_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn new_executor_id() -> String {
    let session = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}",
        &session[..6],
        EXECUTOR_COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

/// Everything an activation of one job shares
struct JobContext {
    function: Arc<FunctionSpec>,
    extra: Option<ExtraArgs>,
    env: HashMap<String, String>,
    timeout: Duration,
    runtime_memory: Option<u32>,
}

struct Activation {
    future: ResponseFuture,
    row: DataRow,
    partition: Option<Partition>,
}

/// Status record stored next to each call's output
#[derive(Serialize)]
struct StatusRecord<'a> {
    call_id: String,
    status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a FunctionError>,
    func_exec_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_size: Option<u64>,
}

/// State shared with worker tasks
struct Runtime {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    slots: Arc<Semaphore>,
    events: Notify,
    invocations: AtomicUsize,
}

impl Runtime {
    /// Run a group of activations sequentially on one worker slot
    async fn run_group(self: Arc<Self>, job: Arc<JobContext>, group: Vec<Activation>) {
        let Ok(_permit) = self.slots.clone().acquire_owned().await else {
            return;
        };
        let worker_id = self.invocations.fetch_add(1, Ordering::SeqCst);
        for activation in &group {
            activation.future.mark_invoked(worker_id, job.runtime_memory);
        }
        for activation in group {
            self.run(&job, activation).await;
        }
    }

    async fn run(&self, job: &JobContext, activation: Activation) {
        let Activation {
            future,
            row,
            partition,
        } = activation;
        future.mark_running();

        let row = match &partition {
            Some(partition) => {
                let (start, end) = partition.data_byte_range;
                match self
                    .storage
                    .get_range(&partition.bucket, &partition.key, start, end)
                    .await
                {
                    Ok(data) => partitioner::inject_partition(row, partition, &data),
                    Err(e) => {
                        let error = FunctionError::new("StorageError", e.to_string());
                        self.settle(&future, 0.0, Err(error)).await;
                        return;
                    }
                }
            }
            None => row,
        };
        self.execute(job, &future, row).await;
    }

    /// Bind, invoke and settle an activation already marked running
    async fn execute(&self, job: &JobContext, future: &ResponseFuture, row: DataRow) {
        let (outcome, elapsed) = match row.bind(job.extra.as_ref()) {
            Ok(args) => invoke(job, future, args).await,
            Err(e) => (Err(FunctionError::type_error(e.to_string())), 0.0),
        };
        self.settle(future, elapsed, outcome).await;
    }

    async fn settle(
        &self,
        future: &ResponseFuture,
        elapsed: f64,
        outcome: std::result::Result<Value, FunctionError>,
    ) {
        let id = future.id();
        let outcome = match outcome {
            Ok(value) => self.store_output(id, &value).await,
            Err(error) => Err(error),
        };

        let record = StatusRecord {
            call_id: id.to_string(),
            status: if outcome.is_ok() {
                CallStatus::Success
            } else {
                CallStatus::Error
            },
            error: outcome.as_ref().err(),
            func_exec_time: elapsed,
            result_size: outcome.as_ref().ok().copied(),
        };
        if let Err(e) = put_json(self.storage.as_ref(), &self.bucket, &id.status_key(), &record).await
        {
            warn!("Failed to store status of {}: {}", id, e);
        }

        match outcome {
            Ok(size) => future.settle_success(elapsed, size),
            Err(error) => {
                debug!("Call {} failed: {}", id, error);
                future.settle_error(elapsed, error);
            }
        }
        self.events.notify_waiters();
    }

    async fn store_output(
        &self,
        id: &CallId,
        value: &Value,
    ) -> std::result::Result<u64, FunctionError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| FunctionError::new("SerializationError", e.to_string()))?;
        let size = body.len() as u64;
        self.storage
            .put_object(&self.bucket, &id.output_key(), body)
            .await
            .map_err(|e| FunctionError::new("StorageError", e.to_string()))?;
        Ok(size)
    }

    /// Gather the map results a reducer consumes, in map order
    async fn collect_map_results(
        &self,
        maps: &[ResponseFuture],
    ) -> std::result::Result<Vec<Value>, FunctionError> {
        if let Some((failed, error)) = maps
            .iter()
            .find_map(|f| f.error().map(|error| (f.id().clone(), error)))
        {
            return Err(FunctionError::new(
                error.kind,
                format!("map call {} failed: {}", failed, error.message),
            ));
        }
        let mut results = Vec::with_capacity(maps.len());
        for map in maps {
            let body = self
                .storage
                .get_object(&self.bucket, &map.id().output_key())
                .await
                .map_err(|e| FunctionError::new("StorageError", e.to_string()))?;
            let value = serde_json::from_slice(&body)
                .map_err(|e| FunctionError::new("SerializationError", e.to_string()))?;
            results.push(value);
        }
        Ok(results)
    }

    /// Reducer lifecycle: invoked after `spawn_at` maps settled, runs after all of them
    async fn run_reducer(
        self: Arc<Self>,
        job: Arc<JobContext>,
        reducer: ResponseFuture,
        maps: Vec<ResponseFuture>,
        spawn_at: usize,
    ) {
        {
            let mut pending: FuturesUnordered<_> = maps.iter().map(|f| f.wait_settled()).collect();
            let mut settled = 0;
            while settled < spawn_at && pending.next().await.is_some() {
                settled += 1;
            }
            let worker_id = self.invocations.fetch_add(1, Ordering::SeqCst);
            reducer.mark_invoked(worker_id, job.runtime_memory);
            debug!("Reducer {} spawned after {} map calls settled", reducer.id(), settled);
            while pending.next().await.is_some() {}
        }

        // The slot is taken only once the maps are done so reducers never starve them
        let Ok(_permit) = self.slots.clone().acquire_owned().await else {
            return;
        };
        reducer.mark_running();
        match self.collect_map_results(&maps).await {
            Ok(results) => {
                let row = DataRow::Tuple(vec![Value::Array(results)]);
                self.execute(&job, &reducer, row).await;
            }
            Err(error) => self.settle(&reducer, 0.0, Err(error)).await,
        }
    }
}

async fn invoke(
    job: &JobContext,
    future: &ResponseFuture,
    args: CallArgs,
) -> (std::result::Result<Value, FunctionError>, f64) {
    let function = job.function.clone();
    let context = CallContext {
        call_id: future.id().to_string(),
        env: job.env.clone(),
    };
    let started = Instant::now();
    // On timeout the blocking thread is detached; its result is discarded
    let handle = tokio::task::spawn_blocking(move || function.invoke(args, &context));
    let result = match tokio::time::timeout(job.timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(FunctionError::new(
            WORKER_LOST,
            format!("worker died during the activation: {}", join_error),
        )),
        Err(_) => Err(FunctionError::new(
            "TimeoutError",
            format!(
                "activation exceeded the {}s timeout",
                job.timeout.as_secs_f64()
            ),
        )),
    };
    (result, started.elapsed().as_secs_f64())
}

/// Error kind of activations whose worker panicked
const WORKER_LOST: &str = "WorkerLost";

/// Error returned when a selected activation raised and `throw_except` is set
fn activation_error(future: &ResponseFuture, error: &FunctionError) -> ComputeError {
    let code = match error.kind.as_str() {
        "TimeoutError" => ErrorCode::EXEC_TIMEOUT,
        WORKER_LOST => {
            return ComputeError::backend_with_code(
                ErrorCode::BACKEND_WORKER_LOST,
                format!("call {} lost its worker: {}", future.id(), error.message),
            )
        }
        _ => ErrorCode::EXEC_ACTIVATION_FAILED,
    };
    ComputeError::execution_with_code(
        code,
        format!("call {} raised {}: {}", future.id(), error.kind, error.message),
        Some(future.id().to_string()),
    )
    .with_kind(error.kind.clone())
}

fn wait_timeout_error(operation: &str, futures: &[ResponseFuture], timeout: Option<Duration>) -> ComputeError {
    let pending = futures.iter().filter(|f| !f.is_settled()).count();
    ComputeError::execution_with_code(
        ErrorCode::EXEC_TIMEOUT,
        format!(
            "{} timed out after {:.1}s with {} of {} futures pending",
            operation,
            timeout.unwrap_or_default().as_secs_f64(),
            pending,
            futures.len()
        ),
        None,
    )
    .with_kind("TimeoutError")
}

/// In-place value of a call that has no result
fn error_value(future: &ResponseFuture, kind: &str, message: &str) -> Value {
    json!({
        "error": {
            "call_id": future.id().to_string(),
            "kind": kind,
            "message": message,
        }
    })
}

async fn fetch_result(future: ResponseFuture) -> Result<Value> {
    if let Some(value) = future.cached_result() {
        return Ok(value);
    }
    match future.status() {
        CallStatus::Error => {
            let error = future
                .error()
                .unwrap_or_else(|| FunctionError::new("RuntimeError", "unknown error"));
            Ok(error_value(&future, &error.kind, &error.message))
        }
        CallStatus::Success | CallStatus::Done => {
            let key = future.id().output_key();
            let body = future
                .storage()
                .get_object(future.bucket(), &key)
                .await
                .map_err(|e| ComputeError::from(e).with_context(format!("result of {}", future.id())))?;
            let value: Value = serde_json::from_slice(&body).map_err(|e| {
                ComputeError::storage_with_code(
                    ErrorCode::STORAGE_SERIALIZATION_ERROR,
                    format!("corrupt output of {}", future.id()),
                    Some(key.clone()),
                )
                .with_source(e)
            })?;
            future.set_result(value.clone());
            Ok(value)
        }
        _ => Ok(error_value(
            &future,
            "TimeoutError",
            "result not available before the timeout",
        )),
    }
}

async fn fetch_all(futures: &[ResponseFuture], concurrency: usize) -> Result<Vec<Value>> {
    stream::iter(futures.iter().cloned().map(fetch_result))
        .buffered(concurrency.max(1))
        .collect::<Vec<Result<Value>>>()
        .await
        .into_iter()
        .collect()
}

/// Executor running activations in this process
pub struct LocalExecutor {
    id: String,
    settings: ExecutorSettings,
    runtime: Arc<Runtime>,
    job_counter: AtomicUsize,
    jobs: Mutex<Vec<JobRecord>>,
    /// Each reducer with the map calls whose outputs it reads
    reductions: Mutex<Vec<(ResponseFuture, Vec<CallId>)>>,
}

impl LocalExecutor {
    /// Build an executor over the storage named in `settings`
    pub async fn new(settings: ExecutorSettings) -> Result<Self> {
        let storage = StorageFactory::from_config(&settings.storage)
            .await
            .map_err(|e| match e {
                StorageError::Configuration(_) => ComputeError::from(e),
                e => ComputeError::backend_with_code(
                    ErrorCode::BACKEND_UNAVAILABLE,
                    format!(
                        "{} backend cannot reach {} storage",
                        settings.backend, settings.storage.backend
                    ),
                )
                .with_source(e),
            })?;
        Ok(Self::with_storage(settings, storage))
    }

    /// Build an executor over an existing storage backend
    pub fn with_storage(settings: ExecutorSettings, storage: Arc<dyn ObjectStorage>) -> Self {
        let id = new_executor_id();
        info!(
            "ExecutorID {} | {} mode, backend {}, storage {}, {} workers",
            id, settings.mode, settings.backend, settings.storage.backend, settings.workers
        );
        let runtime = Arc::new(Runtime {
            storage,
            bucket: settings.storage.bucket.clone(),
            slots: Arc::new(Semaphore::new(
                settings.workers.clamp(1, Semaphore::MAX_PERMITS),
            )),
            events: Notify::new(),
            invocations: AtomicUsize::new(0),
        });
        Self {
            id,
            settings,
            runtime,
            job_counter: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
            reductions: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.runtime.storage
    }

    fn jobs(&self) -> MutexGuard<'_, Vec<JobRecord>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map calls read by a reducer that has not settled yet
    fn pending_reducer_inputs(&self) -> HashSet<CallId> {
        let mut reductions = self.reductions.lock().unwrap_or_else(PoisonError::into_inner);
        reductions.retain(|(reducer, _)| !reducer.is_settled());
        reductions
            .iter()
            .flat_map(|(_, maps)| maps.iter().cloned())
            .collect()
    }

    fn next_job_id(&self, kind: JobKind) -> String {
        format!(
            "{}{:03}",
            kind.prefix(),
            self.job_counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn new_future(&self, job_id: &str, index: usize, function: &str) -> ResponseFuture {
        ResponseFuture::new(
            CallId::new(&self.id, job_id, index),
            function,
            self.runtime.storage.clone(),
            self.runtime.bucket.clone(),
        )
    }

    fn job_context(
        &self,
        function: Arc<FunctionSpec>,
        extra: Option<ExtraArgs>,
        settings: &JobSettings,
        runtime_memory: Option<u32>,
    ) -> Arc<JobContext> {
        Arc::new(JobContext {
            function,
            extra,
            env: settings.extra_env.clone(),
            timeout: settings
                .timeout
                .unwrap_or_else(|| self.settings.execution_timeout()),
            runtime_memory: runtime_memory.or(self.settings.runtime_memory),
        })
    }

    /// Store function and job metadata before dispatch
    async fn store_metadata(
        &self,
        job_id: &str,
        kind: JobKind,
        function: &FunctionSpec,
        settings: &JobSettings,
        rows: &[PlannedRow],
        chunksize: Option<usize>,
    ) -> Result<()> {
        let storage = self.runtime.storage.as_ref();
        let bucket = &self.runtime.bucket;

        let function_key = format!("{}/{}/{}.json", FUNCTIONS_PREFIX, self.id, function.name());
        if storage.head_object(bucket, &function_key).await?.is_none() {
            put_json(storage, bucket, &function_key, &function.info()).await?;
        }

        let job_prefix = CallId::new(&self.id, job_id, 0).job_prefix();
        let metadata = json!({
            "executor_id": self.id,
            "job_id": job_id,
            "kind": kind,
            "function": function.name(),
            "total_calls": rows.len(),
            "chunksize": chunksize,
            "runtime_memory": settings.runtime_memory,
            "timeout": settings.timeout.map(|t| t.as_secs_f64()),
            "include_modules": settings.include_modules,
            "exclude_modules": settings.exclude_modules,
        });
        put_json(storage, bucket, &format!("{}job.json", job_prefix), &metadata).await?;

        let inputs: Vec<&DataRow> = rows.iter().map(|r| &r.row).collect();
        put_json(storage, bucket, &format!("{}inputs.json", job_prefix), &inputs).await?;

        let partitions: Vec<&Partition> = rows.iter().filter_map(|r| r.partition.as_ref()).collect();
        if !partitions.is_empty() {
            let key = format!("{}/{}/{}/partitions.json", CLOUDOBJECTS_PREFIX, self.id, job_id);
            put_json(storage, bucket, &key, &partitions).await?;
        }
        Ok(())
    }

    /// Create futures for `rows`, record the job and dispatch it
    async fn submit_job(
        &self,
        kind: JobKind,
        job: Arc<JobContext>,
        settings: &JobSettings,
        rows: Vec<PlannedRow>,
        chunksize: Option<usize>,
        produce_output: bool,
    ) -> Result<(String, Vec<ResponseFuture>)> {
        let job_id = self.next_job_id(kind);
        self.store_metadata(&job_id, kind, &job.function, settings, &rows, chunksize)
            .await?;

        let activations: Vec<Activation> = rows
            .into_iter()
            .enumerate()
            .map(|(index, planned)| {
                let mut future = self
                    .new_future(&job_id, index, job.function.name())
                    .with_partition_key(planned.partition.as_ref().map(Partition::object_key));
                if !produce_output {
                    future = future.without_output();
                }
                Activation {
                    future,
                    row: planned.row,
                    partition: planned.partition,
                }
            })
            .collect();
        let futures: Vec<ResponseFuture> = activations.iter().map(|a| a.future.clone()).collect();

        self.jobs().push(JobRecord {
            job_id: job_id.clone(),
            kind,
            function: job.function.name().to_string(),
            runtime_memory: job.runtime_memory,
            futures: futures.clone(),
        });

        let group_size = chunksize.filter(|c| *c > 0).unwrap_or(1);
        let mut remaining = activations.into_iter().peekable();
        let mut groups = 0;
        while remaining.peek().is_some() {
            let group: Vec<Activation> = remaining.by_ref().take(group_size).collect();
            tokio::spawn(self.runtime.clone().run_group(job.clone(), group));
            groups += 1;
        }

        info!(
            "ExecutorID {} | JobID {} - Submitted {} {} calls in {} invocations",
            self.id,
            job_id,
            futures.len(),
            job.function.name(),
            groups
        );
        Ok((job_id, futures))
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    async fn call_async(&self, request: CallAsyncRequest) -> Result<ResponseFuture> {
        let CallAsyncRequest {
            function,
            row,
            settings,
        } = request;
        let job = self.job_context(function, None, &settings, settings.runtime_memory);
        let rows = vec![PlannedRow {
            row,
            partition: None,
        }];
        let (_, mut futures) = self
            .submit_job(JobKind::CallAsync, job, &settings, rows, None, true)
            .await?;
        futures
            .pop()
            .ok_or_else(|| ComputeError::execution("call_async produced no future"))
    }

    async fn map(&self, request: MapRequest) -> Result<Vec<ResponseFuture>> {
        if let Some(extra) = &request.extra_args {
            extra.validate("extra_args")?;
        }
        let rows = partitioner::plan_rows(&self.runtime.storage, request.rows, &request.objects).await?;
        let job = self.job_context(
            request.function,
            request.extra_args,
            &request.settings,
            request.settings.runtime_memory,
        );
        let (_, futures) = self
            .submit_job(JobKind::Map, job, &request.settings, rows, request.chunksize, true)
            .await?;
        Ok(futures)
    }

    async fn map_reduce(&self, request: MapReduceRequest) -> Result<Vec<ResponseFuture>> {
        if let Some(extra) = &request.extra_args {
            extra.validate("extra_args")?;
        }
        if let Some(extra) = &request.extra_args_reduce {
            extra.validate("extra_args_reduce")?;
        }
        if request.spawn_reducer > 100 {
            return Err(ComputeError::validation_with_code(
                ErrorCode::VALIDATION_OUT_OF_RANGE,
                format!("spawn_reducer must be within 0..=100, got {}", request.spawn_reducer),
                Some("spawn_reducer".to_string()),
            ));
        }

        let rows = partitioner::plan_rows(&self.runtime.storage, request.rows, &request.objects).await?;
        let map_job = self.job_context(
            request.map_function,
            request.extra_args,
            &request.settings,
            request.settings.runtime_memory,
        );
        let (_, maps) = self
            .submit_job(JobKind::Map, map_job, &request.settings, rows, request.chunksize, false)
            .await?;

        // One reducer over everything, or one per source object
        let mut groups: Vec<(Option<String>, Vec<ResponseFuture>)> = Vec::new();
        if request.reduce_by_key {
            for map in &maps {
                let key = map.partition_key().map(str::to_string);
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(map.clone()),
                    None => groups.push((key, vec![map.clone()])),
                }
            }
        }
        if groups.is_empty() {
            groups.push((None, maps.clone()));
        }

        let reduce_job_id = self.next_job_id(JobKind::Reduce);
        let reduce_job = self.job_context(
            request.reduce_function,
            request.extra_args_reduce,
            &request.settings,
            request.reduce_runtime_memory,
        );
        let reduce_settings = JobSettings {
            runtime_memory: request.reduce_runtime_memory,
            ..request.settings.clone()
        };
        let reduce_rows: Vec<PlannedRow> = Vec::new();
        self.store_metadata(
            &reduce_job_id,
            JobKind::Reduce,
            &reduce_job.function,
            &reduce_settings,
            &reduce_rows,
            None,
        )
        .await?;

        let mut reducers = Vec::with_capacity(groups.len());
        for (index, (key, members)) in groups.into_iter().enumerate() {
            let reducer = self
                .new_future(&reduce_job_id, index, reduce_job.function.name())
                .with_partition_key(key);
            {
                let mut reductions = self.reductions.lock().unwrap_or_else(PoisonError::into_inner);
                reductions.retain(|(reducer, _)| !reducer.is_settled());
                reductions.push((reducer.clone(), members.iter().map(|m| m.id().clone()).collect()));
            }
            let spawn_at =
                ((members.len() * usize::from(request.spawn_reducer)) as f64 / 100.0).ceil() as usize;
            tokio::spawn(self.runtime.clone().run_reducer(
                reduce_job.clone(),
                reducer.clone(),
                members,
                spawn_at,
            ));
            reducers.push(reducer);
        }

        self.jobs().push(JobRecord {
            job_id: reduce_job_id.clone(),
            kind: JobKind::Reduce,
            function: reduce_job.function.name().to_string(),
            runtime_memory: reduce_job.runtime_memory,
            futures: reducers.clone(),
        });
        info!(
            "ExecutorID {} | JobID {} - Scheduled {} reducer(s) at {}% of map calls",
            self.id,
            reduce_job_id,
            reducers.len(),
            request.spawn_reducer
        );

        let mut futures = maps;
        futures.extend(reducers);
        Ok(futures)
    }

    async fn get_result(
        &self,
        futures: &[ResponseFuture],
        options: &GetResultOptions,
    ) -> Result<Vec<Value>> {
        let targets: Vec<ResponseFuture> = futures
            .iter()
            .filter(|f| f.produces_output())
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let spec = WaitSpec {
            required: targets.len(),
            timeout: options.timeout(),
            wait_dur: options.wait_dur(),
            show_progressbar: options.show_progressbar,
        };
        let complete =
            monitor::wait_until(&targets, spec, self.settings.monitoring, &self.runtime.events)
                .await;

        if options.throw_except {
            if let Some((future, error)) = targets
                .iter()
                .find_map(|f| f.error().map(|error| (f, error)))
            {
                return Err(activation_error(future, &error));
            }
            if !complete {
                return Err(wait_timeout_error("get_result", &targets, options.timeout()));
            }
        }

        let values = fetch_all(&targets, options.threadpool_size).await?;
        debug!("ExecutorID {} | Fetched {} results", self.id, values.len());
        Ok(values)
    }

    async fn wait(&self, futures: &[ResponseFuture], options: &WaitOptions) -> Result<WaitPartition> {
        if futures.is_empty() {
            return Ok(WaitPartition::default());
        }

        let spec = WaitSpec {
            required: options.return_when.required(futures.len()),
            timeout: options.timeout(),
            wait_dur: options.wait_dur(),
            show_progressbar: options.show_progressbar,
        };
        let complete =
            monitor::wait_until(futures, spec, self.settings.monitoring, &self.runtime.events)
                .await;

        if options.throw_except {
            if let Some((future, error)) = futures
                .iter()
                .find_map(|f| f.error().map(|error| (f, error)))
            {
                return Err(activation_error(future, &error));
            }
            if !complete {
                return Err(wait_timeout_error("wait", futures, options.timeout()));
            }
        }

        let (done, not_done): (Vec<ResponseFuture>, Vec<ResponseFuture>) =
            futures.iter().cloned().partition(|f| f.is_settled());

        if options.download_results {
            let outputs: Vec<ResponseFuture> = done
                .iter()
                .filter(|f| f.produces_output() && f.status() == CallStatus::Success)
                .cloned()
                .collect();
            fetch_all(&outputs, options.threadpool_size).await?;
        }
        Ok(WaitPartition { done, not_done })
    }

    async fn clean(&self, futures: &[ResponseFuture], options: &CleanOptions) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        let mut seen = HashSet::new();
        let mut by_job: Vec<(String, Vec<ResponseFuture>)> = Vec::new();
        // Map outputs stay in storage until their reducer has read them
        let pinned = if options.force {
            HashSet::new()
        } else {
            self.pending_reducer_inputs()
        };
        for future in futures {
            if !seen.insert(future.id().clone()) {
                continue;
            }
            if !options.force && (!future.is_settled() || pinned.contains(future.id())) {
                report.futures_skipped += 1;
                continue;
            }
            let prefix = future.id().job_prefix();
            match by_job.iter_mut().find(|(p, _)| *p == prefix) {
                Some((_, members)) => members.push(future.clone()),
                None => by_job.push((prefix, vec![future.clone()])),
            }
        }

        let job_sizes: HashMap<String, usize> = self
            .jobs()
            .iter()
            .map(|job| {
                (
                    CallId::new(&self.id, &job.job_id, 0).job_prefix(),
                    job.futures.len(),
                )
            })
            .collect();

        for (prefix, members) in by_job {
            let storage = members[0].storage().clone();
            let bucket = members[0].bucket().to_string();
            if job_sizes.get(&prefix) == Some(&members.len()) {
                report.objects_deleted += delete_prefix(storage.as_ref(), &bucket, &prefix).await?;
                report.jobs_removed.push(prefix.trim_end_matches('/').to_string());
            } else {
                for future in &members {
                    report.objects_deleted +=
                        delete_prefix(storage.as_ref(), &bucket, &future.id().call_prefix()).await?;
                }
            }
            for future in &members {
                future.mark_cleaned();
            }
            report.futures_cleaned += members.len();
        }

        let storage = self.runtime.storage.as_ref();
        let bucket = &self.runtime.bucket;
        if options.clean_fn {
            let prefix = format!("{}/{}/", FUNCTIONS_PREFIX, self.id);
            report.objects_deleted += delete_prefix(storage, bucket, &prefix).await?;
        }
        if options.clean_cloudobjects {
            let prefix = format!("{}/{}/", CLOUDOBJECTS_PREFIX, self.id);
            report.objects_deleted += delete_prefix(storage, bucket, &prefix).await?;
        }

        if options.on_exit {
            debug!(
                "ExecutorID {} | Cleaned {} futures ({} objects) on exit",
                self.id, report.futures_cleaned, report.objects_deleted
            );
        } else {
            info!(
                "ExecutorID {} | Cleaned {} futures, {} objects deleted, {} skipped",
                self.id, report.futures_cleaned, report.objects_deleted, report.futures_skipped
            );
        }
        Ok(report)
    }

    async fn plot(&self, futures: &[ResponseFuture], options: &PlotOptions) -> Result<PlotReport> {
        let calls: Vec<_> = futures
            .iter()
            .map(|f| (f.id().to_string(), f.stats()))
            .collect();
        let dst = options.dst.clone().unwrap_or_else(plot::default_dst);
        let report = plot::write_plots(&dst, &calls, options.figsize).await?;
        info!(
            "ExecutorID {} | Plots saved to {} and {}",
            self.id,
            report.timeline.display(),
            report.histogram.display()
        );
        Ok(report)
    }

    async fn job_summary(&self, cloud_objects_n: Option<u64>) -> Result<JobSummary> {
        let records = self.jobs().clone();
        let summary = JobSummary::new(
            &self.id,
            self.settings.mode,
            &self.settings.backend,
            self.settings.storage.backend,
            &records,
            cloud_objects_n,
        );
        summary.log();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::handle::{ExecutionMode, ExecutorKind};
    use crate::executor::monitor::MonitoringMode;
    use crate::executor::request::ObjectPartitioning;
    use crate::registry::FunctionRegistry;
    use crate::storage::backends::MemoryBackend;
    use crate::storage::{BackendType, StorageConfig};
    use std::path::PathBuf;

    fn settings(workers: usize) -> ExecutorSettings {
        ExecutorSettings {
            kind: ExecutorKind::Localhost,
            mode: ExecutionMode::Localhost,
            backend: "localhost".into(),
            storage: StorageConfig {
                backend: BackendType::Memory,
                bucket: "test-bucket".into(),
                root: PathBuf::from("/unused"),
            },
            monitoring: MonitoringMode::Storage,
            log_level: None,
            execution_timeout: 30,
            workers,
            runtime_memory: None,
            amqp_url: None,
            config_file: None,
            config: json!({}),
        }
    }

    fn executor() -> (LocalExecutor, Arc<MemoryBackend>) {
        let storage = Arc::new(MemoryBackend::new());
        (LocalExecutor::with_storage(settings(2), storage.clone()), storage)
    }

    fn fast() -> GetResultOptions {
        GetResultOptions {
            wait_dur_sec: 0.01,
            show_progressbar: false,
            timeout: Some(10.0),
            ..GetResultOptions::default()
        }
    }

    fn function(name: &str) -> Arc<FunctionSpec> {
        FunctionRegistry::with_builtins().resolve(name).unwrap()
    }

    fn map_request(name: &str, rows: Vec<DataRow>, extra: Option<ExtraArgs>) -> MapRequest {
        MapRequest {
            function: function(name),
            rows,
            extra_args: extra,
            chunksize: None,
            objects: ObjectPartitioning::default(),
            settings: JobSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_map_with_tuple_extra_args() {
        let (executor, _) = executor();
        let rows = vec![
            DataRow::Tuple(vec![json!(2)]),
            DataRow::Tuple(vec![json!(3)]),
            DataRow::Tuple(vec![json!(4)]),
        ];
        let futures = executor
            .map(map_request("add", rows, Some(ExtraArgs::Tuple(vec![json!(10)]))))
            .await
            .unwrap();
        assert_eq!(futures[0].id().job_id, "M000");

        let values = executor.get_result(&futures, &fast()).await.unwrap();
        assert_eq!(values, vec![json!(12), json!(13), json!(14)]);
        assert!(futures.iter().all(|f| f.status() == CallStatus::Done));
    }

    #[tokio::test]
    async fn test_unbounded_worker_setting_is_clamped() {
        let storage = Arc::new(MemoryBackend::new());
        let executor = LocalExecutor::with_storage(settings(usize::MAX), storage);
        let futures = executor
            .map(map_request("identity", vec![DataRow::Single(json!(1))], None))
            .await
            .unwrap();
        let values = executor.get_result(&futures, &fast()).await.unwrap();
        assert_eq!(values, vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_chunked_map_shares_invocations() {
        let (executor, _) = executor();
        let rows = (0..5).map(|i| DataRow::Single(json!(i))).collect();
        let mut request = map_request("identity", rows, None);
        request.chunksize = Some(2);
        let futures = executor.map(request).await.unwrap();
        let values = executor.get_result(&futures, &fast()).await.unwrap();
        assert_eq!(values, (0..5).map(|i| json!(i)).collect::<Vec<_>>());

        let workers: HashSet<usize> = futures.iter().filter_map(|f| f.stats().worker_id).collect();
        assert_eq!(workers.len(), 3);
    }

    #[tokio::test]
    async fn test_throw_except_reraises_activation_error() {
        let (executor, _) = executor();
        let rows = vec![DataRow::Single(json!(1)), DataRow::Single(json!("boom"))];
        let futures = executor
            .map(map_request("fail", rows, None))
            .await
            .unwrap();

        let err = executor.get_result(&futures, &fast()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EXEC_ACTIVATION_FAILED);

        let captured = executor
            .get_result(
                &futures,
                &GetResultOptions {
                    throw_except: false,
                    ..fast()
                },
            )
            .await
            .unwrap();
        assert_eq!(captured[1]["error"]["kind"], "RuntimeError");
        assert_eq!(captured[1]["error"]["message"], "boom");
    }

    #[tokio::test]
    async fn test_activation_timeout() {
        let (executor, _) = executor();
        let future = executor
            .call_async(CallAsyncRequest {
                function: function("sleep"),
                row: DataRow::Single(json!(2)),
                settings: JobSettings {
                    timeout: Some(Duration::from_millis(50)),
                    ..JobSettings::default()
                },
            })
            .await
            .unwrap();
        assert_eq!(future.id().job_id, "A000");

        let err = executor.get_result(&[future], &fast()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EXEC_TIMEOUT);
    }

    #[tokio::test]
    async fn test_panicking_activation_loses_worker() {
        let (executor, _) = executor();
        let future = executor
            .call_async(CallAsyncRequest {
                function: Arc::new(
                    FunctionSpec::new("crash", |_, _| panic!("worker crashed")).param("value"),
                ),
                row: DataRow::Single(json!(1)),
                settings: JobSettings::default(),
            })
            .await
            .unwrap();

        let err = executor.get_result(&[future], &fast()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::BACKEND_WORKER_LOST);
        assert_eq!(err.category(), "backend");
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_unreachable_storage_is_backend_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let mut settings = settings(1);
        settings.storage.backend = BackendType::Localhost;
        settings.storage.root = blocker.join("storage");

        let err = match LocalExecutor::new(settings).await {
            Ok(_) => panic!("storage under a regular file must fail"),
            Err(err) => err,
        };
        assert_eq!(err.code(), ErrorCode::BACKEND_UNAVAILABLE);
        assert_eq!(err.category(), "backend");
    }

    #[tokio::test]
    async fn test_map_reduce_returns_reducer_output_only() {
        let (executor, _) = executor();
        let futures = executor
            .map_reduce(MapReduceRequest {
                map_function: function("increment"),
                reduce_function: function("reduce_sum"),
                rows: (1..=5).map(|i| DataRow::Single(json!(i))).collect(),
                extra_args: Some(ExtraArgs::Tuple(vec![json!(7)])),
                extra_args_reduce: None,
                chunksize: None,
                objects: ObjectPartitioning::default(),
                reduce_by_key: false,
                spawn_reducer: 20,
                settings: JobSettings::default(),
                reduce_runtime_memory: None,
            })
            .await
            .unwrap();

        assert_eq!(futures.len(), 6);
        assert_eq!(futures[5].id().job_id, "R001");
        assert!(!futures[0].produces_output());

        let values = executor.get_result(&futures, &fast()).await.unwrap();
        assert_eq!(values, vec![json!(50)]);
    }

    #[tokio::test]
    async fn test_reducer_fails_when_a_map_fails() {
        let (executor, _) = executor();
        let futures = executor
            .map_reduce(MapReduceRequest {
                map_function: function("fail"),
                reduce_function: function("reduce_sum"),
                rows: vec![DataRow::Single(json!("bad row"))],
                extra_args: None,
                extra_args_reduce: None,
                chunksize: None,
                objects: ObjectPartitioning::default(),
                reduce_by_key: false,
                spawn_reducer: 100,
                settings: JobSettings::default(),
                reduce_runtime_memory: None,
            })
            .await
            .unwrap();

        let err = executor.get_result(&futures, &fast()).await.unwrap_err();
        assert!(err.to_string().contains("map call"));
    }

    #[tokio::test]
    async fn test_object_partitions_reduce_by_key() {
        let (executor, storage) = executor();
        storage
            .put_object("data", "a.txt", b"one two\nthree\n".to_vec())
            .await
            .unwrap();
        storage
            .put_object("data", "b.txt", b"four\n".to_vec())
            .await
            .unwrap();

        let row = |key: &str| {
            DataRow::Mapping(json!({ "obj": key }).as_object().cloned().unwrap())
        };
        let futures = executor
            .map_reduce(MapReduceRequest {
                map_function: function("count_words"),
                reduce_function: function("reduce_sum"),
                rows: vec![row("data/a.txt"), row("data/b.txt")],
                extra_args: None,
                extra_args_reduce: None,
                chunksize: None,
                objects: ObjectPartitioning {
                    chunk_number: Some(2),
                    ..ObjectPartitioning::default()
                },
                reduce_by_key: true,
                spawn_reducer: 20,
                settings: JobSettings::default(),
                reduce_runtime_memory: None,
            })
            .await
            .unwrap();

        let values = executor.get_result(&futures, &fast()).await.unwrap();
        assert_eq!(values, vec![json!(3), json!(1)]);
    }

    #[tokio::test]
    async fn test_wait_partitions_selection() {
        let (executor, _) = executor();
        let quick = executor
            .call_async(CallAsyncRequest {
                function: function("identity"),
                row: DataRow::Single(json!(1)),
                settings: JobSettings::default(),
            })
            .await
            .unwrap();
        let slow = executor
            .call_async(CallAsyncRequest {
                function: function("sleep"),
                row: DataRow::Single(json!(1.5)),
                settings: JobSettings::default(),
            })
            .await
            .unwrap();

        let options = WaitOptions {
            return_when: crate::executor::ReturnWhen::AnyCompleted,
            wait_dur_sec: 0.01,
            show_progressbar: false,
            ..WaitOptions::default()
        };
        let partition = executor
            .wait(&[quick.clone(), slow.clone()], &options)
            .await
            .unwrap();
        assert_eq!(partition.done, vec![quick]);
        assert_eq!(partition.not_done, vec![slow]);
    }

    #[tokio::test]
    async fn test_clean_removes_whole_job_prefix() {
        let (executor, storage) = executor();
        let futures = executor
            .map(map_request("identity", vec![DataRow::Single(json!(1))], None))
            .await
            .unwrap();
        executor.get_result(&futures, &fast()).await.unwrap();
        assert!(!storage.list_keys("test-bucket", "jobs/").await.unwrap().is_empty());

        let report = executor
            .clean(&futures, &CleanOptions { clean_fn: true, ..CleanOptions::default() })
            .await
            .unwrap();
        assert_eq!(report.futures_cleaned, 1);
        assert_eq!(report.jobs_removed.len(), 1);
        assert!(storage.list_keys("test-bucket", "jobs/").await.unwrap().is_empty());
        assert!(storage.list_keys("test-bucket", "functions/").await.unwrap().is_empty());
        assert!(futures[0].is_cleaned());

        // Downloaded values survive the clean
        let values = executor.get_result(&futures, &fast()).await.unwrap();
        assert_eq!(values, vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_clean_skips_unsettled_without_force() {
        let (executor, _) = executor();
        let slow = executor
            .call_async(CallAsyncRequest {
                function: function("sleep"),
                row: DataRow::Single(json!(1)),
                settings: JobSettings::default(),
            })
            .await
            .unwrap();
        let report = executor
            .clean(std::slice::from_ref(&slow), &CleanOptions::default())
            .await
            .unwrap();
        assert_eq!(report.futures_skipped, 1);
        assert_eq!(report.futures_cleaned, 0);
    }

    #[tokio::test]
    async fn test_clean_keeps_map_outputs_until_reducer_settles() {
        let (executor, storage) = executor();
        let slow_reduce = Arc::new(
            FunctionSpec::new("slow_reduce", |args, _| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(json!(args[0].as_array().map_or(0, Vec::len)))
            })
            .param("results"),
        );
        let futures = executor
            .map_reduce(MapReduceRequest {
                map_function: function("identity"),
                reduce_function: slow_reduce,
                rows: vec![DataRow::Single(json!(1)), DataRow::Single(json!(2))],
                extra_args: None,
                extra_args_reduce: None,
                chunksize: None,
                objects: ObjectPartitioning::default(),
                reduce_by_key: false,
                spawn_reducer: 100,
                settings: JobSettings::default(),
                reduce_runtime_memory: None,
            })
            .await
            .unwrap();
        for map in &futures[..2] {
            map.wait_settled().await;
        }

        let report = executor.clean(&futures, &CleanOptions::default()).await.unwrap();
        assert_eq!(report.futures_skipped, 3);
        assert_eq!(report.futures_cleaned, 0);
        assert!(report.jobs_removed.is_empty());
        assert!(!storage.list_keys("test-bucket", "jobs/").await.unwrap().is_empty());

        let values = executor.get_result(&futures, &fast()).await.unwrap();
        assert_eq!(values, vec![json!(2)]);

        let report = executor.clean(&futures, &CleanOptions::default()).await.unwrap();
        assert_eq!(report.futures_cleaned, 3);
        assert_eq!(report.jobs_removed.len(), 2);
    }

    #[tokio::test]
    async fn test_job_summary_counts_jobs() {
        let (executor, _) = executor();
        let futures = executor
            .map(map_request("identity", vec![DataRow::Single(json!(1)); 3], None))
            .await
            .unwrap();
        executor.get_result(&futures, &fast()).await.unwrap();

        let summary = executor.job_summary(Some(2)).await.unwrap();
        assert_eq!(summary.jobs.len(), 1);
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.jobs[0].success, 3);
        assert_eq!(summary.cloud_objects_n, Some(2));
    }
}
