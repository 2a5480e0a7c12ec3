//! Job bookkeeping and the job summary report

use serde::Serialize;
use std::fmt;
use tracing::info;

use super::future::{CallStatus, ResponseFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CallAsync,
    Map,
    Reduce,
}

impl JobKind {
    /// Prefix letter of job ids
    pub fn prefix(self) -> char {
        match self {
            Self::CallAsync => 'A',
            Self::Map => 'M',
            Self::Reduce => 'R',
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallAsync => write!(f, "call_async"),
            Self::Map => write!(f, "map"),
            Self::Reduce => write!(f, "reduce"),
        }
    }
}

/// One job submitted through an executor
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub kind: JobKind,
    pub function: String,
    pub runtime_memory: Option<u32>,
    pub futures: Vec<ResponseFuture>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummaryRow {
    pub job_id: String,
    pub kind: JobKind,
    pub function: String,
    pub calls: usize,
    pub success: usize,
    pub failed: usize,
    pub pending: usize,
    pub total_exec_time: f64,
    pub avg_exec_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_memory: Option<u32>,
    /// Memory-time product in GB-seconds, when memory is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gb_seconds: Option<f64>,
}

impl JobSummaryRow {
    pub fn from_record(record: &JobRecord) -> Self {
        let mut row = Self {
            job_id: record.job_id.clone(),
            kind: record.kind,
            function: record.function.clone(),
            calls: record.futures.len(),
            success: 0,
            failed: 0,
            pending: 0,
            total_exec_time: 0.0,
            avg_exec_time: 0.0,
            runtime_memory: record.runtime_memory,
            gb_seconds: None,
        };

        for future in &record.futures {
            match future.status() {
                CallStatus::Success | CallStatus::Done => row.success += 1,
                CallStatus::Error => row.failed += 1,
                _ => row.pending += 1,
            }
            row.total_exec_time += future.stats().worker_exec_time.unwrap_or(0.0);
        }

        let settled = row.success + row.failed;
        if settled > 0 {
            row.avg_exec_time = row.total_exec_time / settled as f64;
        }
        row.gb_seconds = row
            .runtime_memory
            .map(|mb| f64::from(mb) / 1024.0 * row.total_exec_time);
        row
    }
}

/// Aggregate over every job an executor ran
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub executor_id: String,
    pub mode: String,
    pub backend: String,
    pub storage: String,
    pub jobs: Vec<JobSummaryRow>,
    pub total_calls: usize,
    pub total_failed: usize,
    pub total_exec_time: f64,
    pub total_gb_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_objects_n: Option<u64>,
}

impl JobSummary {
    pub fn new(
        executor_id: &str,
        mode: impl fmt::Display,
        backend: &str,
        storage: impl fmt::Display,
        records: &[JobRecord],
        cloud_objects_n: Option<u64>,
    ) -> Self {
        let jobs: Vec<JobSummaryRow> = records.iter().map(JobSummaryRow::from_record).collect();
        Self {
            executor_id: executor_id.to_string(),
            mode: mode.to_string(),
            backend: backend.to_string(),
            storage: storage.to_string(),
            total_calls: jobs.iter().map(|j| j.calls).sum(),
            total_failed: jobs.iter().map(|j| j.failed).sum(),
            total_exec_time: jobs.iter().map(|j| j.total_exec_time).sum(),
            total_gb_seconds: jobs.iter().filter_map(|j| j.gb_seconds).sum(),
            jobs,
            cloud_objects_n,
        }
    }

    /// Emit the summary through tracing
    pub fn log(&self) {
        info!(
            "ExecutorID {} | mode {} | backend {} | storage {} | {} jobs, {} calls ({} failed)",
            self.executor_id,
            self.mode,
            self.backend,
            self.storage,
            self.jobs.len(),
            self.total_calls,
            self.total_failed
        );
        for job in &self.jobs {
            info!(
                "  {} {:<10} {:<12} calls={} ok={} failed={} pending={} exec={:.3}s avg={:.3}s",
                job.job_id,
                job.kind.to_string(),
                job.function,
                job.calls,
                job.success,
                job.failed,
                job.pending,
                job.total_exec_time,
                job.avg_exec_time
            );
        }
        if let Some(n) = self.cloud_objects_n {
            info!("  cloud objects declared: {}", n);
        }
    }
}
