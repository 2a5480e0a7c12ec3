//! Sessions: one executor handle and one future ledger per client
//!
//! Every job and management tool is a method on [`Session`]. Operations on
//! a session are serialized by an async mutex; a waiting operation holds
//! the session until it returns.

pub mod manager;

pub use manager::SessionManager;

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConfigLoader;
use crate::error::{ComputeError, Result};
use crate::executor::{
    self, CleanOptions, CleanReport, Executor, ExecutorArgs, ExecutorKind, ExecutorSettings,
    FutureView, GetResultOptions, JobSummary, PlotOptions, ResponseFuture, WaitOptions,
};
use crate::jobs::{self, CallAsyncParams, MapParams, MapReduceParams};
use crate::ledger::{BatchKind, BatchView, FutureBatch, FutureLedger, Selected, Selection, SelectionMode};
use crate::logging::LogControl;
use crate::registry::{FunctionInfo, FunctionRegistry};

/// What a configuration tool returns
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorDescription {
    pub executor_id: String,
    /// Executor replaced by this one, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<String>,
    pub settings: ExecutorSettings,
}

/// What `wait` returns
#[derive(Debug, Clone, Serialize)]
pub struct WaitView {
    pub done: Vec<FutureView>,
    pub not_done: Vec<FutureView>,
}

#[derive(Default)]
struct SessionState {
    executor: Option<Arc<dyn Executor>>,
    ledger: FutureLedger,
}

impl SessionState {
    fn executor(&self) -> Result<Arc<dyn Executor>> {
        self.executor.clone().ok_or_else(ComputeError::no_executor)
    }
}

pub struct Session {
    id: String,
    registry: Arc<FunctionRegistry>,
    loader: Arc<ConfigLoader>,
    log: LogControl,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        registry: Arc<FunctionRegistry>,
        loader: Arc<ConfigLoader>,
        log: LogControl,
    ) -> Self {
        Self {
            id: id.into(),
            registry,
            loader,
            log,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Create an executor of the given variant, replacing the current one
    pub async fn configure(
        &self,
        kind: ExecutorKind,
        args: ExecutorArgs,
    ) -> Result<ExecutorDescription> {
        let executor = executor::create_executor(kind, &args, &self.loader).await?;
        if let Some(level) = &executor.settings().log_level {
            self.log.apply(level.as_deref())?;
        }

        let mut state = self.state.lock().await;
        let replaced = state
            .executor
            .replace(executor.clone())
            .map(|previous| previous.id().to_string());
        if let Some(previous) = &replaced {
            info!(
                "Session {}: executor {} replaced by {}",
                self.id,
                previous,
                executor.id()
            );
        }
        Ok(ExecutorDescription {
            executor_id: executor.id().to_string(),
            replaced,
            settings: executor.settings().clone(),
        })
    }

    /// Submit one asynchronous call and return the full ledger
    pub async fn call_async(&self, params: CallAsyncParams) -> Result<Vec<BatchView>> {
        let mut state = self.state.lock().await;
        let executor = state.executor()?;
        let request = jobs::prepare_call_async(&self.registry, params)?;
        let future = executor.call_async(request).await?;
        state
            .ledger
            .push(FutureBatch::single(executor.id(), future));
        Ok(state.ledger.view())
    }

    /// Submit a map job and return the full ledger
    pub async fn map(&self, params: MapParams) -> Result<Vec<BatchView>> {
        let mut state = self.state.lock().await;
        let executor = state.executor()?;
        let request = jobs::prepare_map(&self.registry, params)?;
        let futures = executor.map(request).await?;
        state.ledger.push(FutureBatch::list(executor.id(), futures));
        Ok(state.ledger.view())
    }

    /// Submit a map-reduce job and return the full ledger
    pub async fn map_reduce(&self, params: MapReduceParams) -> Result<Vec<BatchView>> {
        let mut state = self.state.lock().await;
        let executor = state.executor()?;
        let request = jobs::prepare_map_reduce(&self.registry, params)?;
        let futures = executor.map_reduce(request).await?;
        state.ledger.push(FutureBatch::list(executor.id(), futures));
        Ok(state.ledger.view())
    }

    /// Warn when a selection holds futures of a replaced executor
    fn check_provenance(&self, selected: &Selected, executor: &dyn Executor) {
        let stale: Vec<&str> = selected
            .executor_ids()
            .into_iter()
            .filter(|id| *id != executor.id())
            .collect();
        if !stale.is_empty() {
            warn!(
                "Session {}: selection contains futures of previous executor(s) {}; using live executor {}",
                self.id,
                stale.join(", "),
                executor.id()
            );
        }
    }

    pub async fn get_result(
        &self,
        selection: Selection,
        options: GetResultOptions,
    ) -> Result<Value> {
        let state = self.state.lock().await;
        let selected = state.ledger.select(selection);
        if selected.is_empty() {
            debug!("Session {}: get_result on an empty selection", self.id);
            return Ok(Value::Array(Vec::new()));
        }
        let executor = state.executor()?;
        self.check_provenance(&selected, executor.as_ref());

        let values = executor
            .get_result(&selected.futures(), &options)
            .await?;
        Ok(match selected.mode {
            SelectionMode::Flattened => Value::Array(values),
            SelectionMode::Batch => group_results(&selected, values),
        })
    }

    pub async fn wait(&self, selection: Selection, options: WaitOptions) -> Result<WaitView> {
        let state = self.state.lock().await;
        let selected = state.ledger.select(selection);
        if selected.is_empty() {
            return Ok(WaitView {
                done: Vec::new(),
                not_done: Vec::new(),
            });
        }
        let executor = state.executor()?;
        self.check_provenance(&selected, executor.as_ref());

        let partition = executor.wait(&selected.futures(), &options).await?;
        Ok(WaitView {
            done: partition.done.iter().map(ResponseFuture::view).collect(),
            not_done: partition.not_done.iter().map(ResponseFuture::view).collect(),
        })
    }

    pub async fn clean(&self, selection: Selection, options: CleanOptions) -> Result<CleanReport> {
        let state = self.state.lock().await;
        let selected = state.ledger.select(selection);
        if selected.is_empty() {
            return Ok(CleanReport::default());
        }
        let executor = state.executor()?;
        self.check_provenance(&selected, executor.as_ref());
        executor.clean(&selected.futures(), &options).await
    }

    /// Render plots of the selection and return each future's statistics
    pub async fn plot(&self, selection: Selection, options: PlotOptions) -> Result<Value> {
        let state = self.state.lock().await;
        let selected = state.ledger.select(selection);
        if selected.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        let executor = state.executor()?;
        self.check_provenance(&selected, executor.as_ref());

        executor.plot(&selected.futures(), &options).await?;
        let stats_of = |futures: &[ResponseFuture]| -> Result<Vec<Value>> {
            futures
                .iter()
                .map(|f| serde_json::to_value(f.stats()).map_err(ComputeError::from))
                .collect()
        };
        Ok(match selected.mode {
            SelectionMode::Flattened => Value::Array(stats_of(&selected.futures())?),
            SelectionMode::Batch => Value::Array(
                selected
                    .batches
                    .iter()
                    .map(|batch| stats_of(&batch.futures).map(Value::Array))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    pub async fn job_summary(&self, cloud_objects_n: Option<u64>) -> Result<JobSummary> {
        let executor = self.state.lock().await.executor()?;
        executor.job_summary(cloud_objects_n).await
    }

    /// `del ledger[start:end]`, returning the new ledger
    pub async fn delete_from_future(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Vec<BatchView> {
        let mut state = self.state.lock().await;
        let removed = state.ledger.delete(start, end);
        debug!("Session {}: removed {} batches from the ledger", self.id, removed);
        state.ledger.view()
    }

    pub async fn list_futures(&self) -> Vec<BatchView> {
        self.state.lock().await.ledger.view()
    }

    pub fn list_functions(&self) -> Vec<FunctionInfo> {
        self.registry.catalog()
    }

    /// Clean every tracked future with exit semantics and drop the ledger
    pub async fn teardown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let batches = state.ledger.take_all();
        let Some(executor) = state.executor.take() else {
            return Ok(());
        };
        let futures: Vec<ResponseFuture> = batches
            .into_iter()
            .flat_map(|batch| batch.futures)
            .collect();
        let report = executor.clean(&futures, &CleanOptions::teardown()).await?;
        debug!(
            "Session {}: teardown removed {} objects",
            self.id, report.objects_deleted
        );
        Ok(())
    }
}

/// Split flat results back into one entry per batch.
///
/// Only output-producing futures contribute values, so each batch takes as
/// many values as it has such futures.
fn group_results(selected: &Selected, values: Vec<Value>) -> Value {
    let mut values = values.into_iter();
    let grouped = selected
        .batches
        .iter()
        .map(|batch| {
            let count = batch.futures.iter().filter(|f| f.produces_output()).count();
            let mut own: Vec<Value> = values.by_ref().take(count).collect();
            match (batch.kind, own.len()) {
                (BatchKind::Single, 1) => own.remove(0),
                _ => Value::Array(own),
            }
        })
        .collect();
    Value::Array(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::logging;
    use serde_json::json;

    fn session() -> Session {
        Session::new(
            "test",
            Arc::new(FunctionRegistry::with_builtins()),
            Arc::new(ConfigLoader::explicit_only()),
            logging::detached(),
        )
    }

    async fn configured() -> Session {
        let session = session();
        let args: ExecutorArgs = serde_json::from_value(json!({"storage": "memory"})).unwrap();
        session
            .configure(ExecutorKind::Localhost, args)
            .await
            .unwrap();
        session
    }

    fn quiet() -> GetResultOptions {
        GetResultOptions {
            show_progressbar: false,
            wait_dur_sec: 0.01,
            timeout: Some(10.0),
            ..GetResultOptions::default()
        }
    }

    #[tokio::test]
    async fn test_submission_requires_executor() {
        let session = session();
        let params: CallAsyncParams =
            serde_json::from_value(json!({"name_func": "identity", "data": 1})).unwrap();
        let err = session.call_async(params).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_NO_EXECUTOR);
    }

    #[tokio::test]
    async fn test_empty_selection_skips_executor_check() {
        let session = session();
        let values = session
            .get_result(Selection::default(), quiet())
            .await
            .unwrap();
        assert_eq!(values, json!([]));
        let report = session
            .clean(Selection::default(), CleanOptions::default())
            .await
            .unwrap();
        assert_eq!(report, CleanReport::default());
    }

    #[tokio::test]
    async fn test_batch_mode_groups_results() {
        let session = configured().await;
        let call: CallAsyncParams =
            serde_json::from_value(json!({"name_func": "identity", "data": 5})).unwrap();
        session.call_async(call).await.unwrap();
        let map: MapParams = serde_json::from_value(json!({
            "name_func": "increment",
            "map_iterdata": [1, 2]
        }))
        .unwrap();
        let ledger = session.map(map).await.unwrap();
        assert_eq!(ledger.len(), 2);

        let grouped = session
            .get_result(Selection::new(None, None, true), quiet())
            .await
            .unwrap();
        assert_eq!(grouped, json!([5, [2, 3]]));

        let flat = session
            .get_result(Selection::new(Some(-1), None, false), quiet())
            .await
            .unwrap();
        assert_eq!(flat, json!([2, 3]));
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_ledger() {
        let session = configured().await;
        let call: CallAsyncParams =
            serde_json::from_value(json!({"name_func": "identity", "data": "kept"})).unwrap();
        session.call_async(call).await.unwrap();

        let args: ExecutorArgs = serde_json::from_value(json!({"storage": "memory"})).unwrap();
        let description = session
            .configure(ExecutorKind::Localhost, args)
            .await
            .unwrap();
        assert!(description.replaced.is_some());

        let values = session
            .get_result(Selection::default(), quiet())
            .await
            .unwrap();
        assert_eq!(values, json!(["kept"]));
    }

    #[tokio::test]
    async fn test_teardown_empties_ledger() {
        let session = configured().await;
        let call: CallAsyncParams =
            serde_json::from_value(json!({"name_func": "identity", "data": 1})).unwrap();
        session.call_async(call).await.unwrap();
        session
            .get_result(Selection::default(), quiet())
            .await
            .unwrap();

        session.teardown().await.unwrap();
        assert!(session.list_futures().await.is_empty());
    }
}
