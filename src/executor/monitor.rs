//! Completion monitoring
//!
//! `storage` monitoring polls future states every `wait_dur`; `rabbitmq`
//! monitoring sleeps until a worker publishes a completion event (bounded
//! by the same interval so a missed event only costs latency).

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::future::ResponseFuture;
use crate::error::{ComputeError, ErrorCode};

/// How waiters learn that activations settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringMode {
    #[default]
    Storage,
    Rabbitmq,
}

impl FromStr for MonitoringMode {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "storage" => Ok(Self::Storage),
            "rabbitmq" => Ok(Self::Rabbitmq),
            other => Err(ComputeError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!(
                    "unknown monitoring mode '{}' (expected storage or rabbitmq)",
                    other
                ),
            )),
        }
    }
}

impl std::fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage => write!(f, "storage"),
            Self::Rabbitmq => write!(f, "rabbitmq"),
        }
    }
}

/// Parameters of one wait
const MIN_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct WaitSpec {
    /// Settled futures needed to stop waiting
    pub required: usize,
    pub timeout: Option<Duration>,
    pub wait_dur: Duration,
    pub show_progressbar: bool,
}

/// Block until `spec.required` of `futures` settled or the timeout expires.
///
/// Returns `true` when the requirement was met.
pub async fn wait_until(
    futures: &[ResponseFuture],
    spec: WaitSpec,
    mode: MonitoringMode,
    events: &Notify,
) -> bool {
    // A deadline past the clock's range never expires
    let deadline = spec.timeout.and_then(|t| Instant::now().checked_add(t));
    let progress = create_progress_bar(futures.len(), spec.show_progressbar);
    let poll = spec.wait_dur.clamp(MIN_POLL, MAX_POLL);

    loop {
        // Register interest before checking so an event between the check and
        // the sleep is not lost
        let notified = events.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let settled = futures.iter().filter(|f| f.is_settled()).count();
        progress.set_position(settled as u64);

        if settled >= spec.required {
            progress.finish_and_clear();
            return true;
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    debug!(
                        "Wait timed out with {}/{} futures settled",
                        settled,
                        futures.len()
                    );
                    progress.abandon();
                    return false;
                }
                poll.min(deadline - now)
            }
            None => poll,
        };

        match mode {
            MonitoringMode::Storage => tokio::time::sleep(pause).await,
            MonitoringMode::Rabbitmq => {
                let _ = tokio::time::timeout(pause, notified).await;
            }
        }
    }
}

fn create_progress_bar(total: usize, show: bool) -> ProgressBar {
    if !show || total == 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} futures")
        .map(|style| style.progress_chars("█▓▒░ "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::future::CallId;
    use crate::storage::backends::MemoryBackend;
    use std::sync::Arc;

    fn futures(n: usize) -> Vec<ResponseFuture> {
        let storage = Arc::new(MemoryBackend::new());
        (0..n)
            .map(|i| ResponseFuture::new(CallId::new("e", "M000", i), "f", storage.clone(), "b"))
            .collect()
    }

    fn spec(required: usize, timeout_ms: u64) -> WaitSpec {
        WaitSpec {
            required,
            timeout: Some(Duration::from_millis(timeout_ms)),
            wait_dur: Duration::from_millis(10),
            show_progressbar: false,
        }
    }

    #[tokio::test]
    async fn test_times_out_when_nothing_settles() {
        let fs = futures(2);
        let reached = wait_until(&fs, spec(1, 50), MonitoringMode::Storage, &Notify::new()).await;
        assert!(!reached);
    }

    #[tokio::test]
    async fn test_zero_required_returns_immediately() {
        let fs = futures(2);
        assert!(wait_until(&fs, spec(0, 0), MonitoringMode::Storage, &Notify::new()).await);
    }

    #[tokio::test]
    async fn test_push_mode_wakes_on_event() {
        let fs = futures(1);
        let events = Arc::new(Notify::new());
        let settle = {
            let f = fs[0].clone();
            let events = events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                f.settle_success(0.0, 1);
                events.notify_waiters();
            })
        };
        let wait = WaitSpec {
            wait_dur: Duration::from_secs(30),
            timeout: Some(Duration::from_secs(5)),
            ..spec(1, 0)
        };
        assert!(wait_until(&fs, wait, MonitoringMode::Rabbitmq, &events).await);
        settle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let fs = futures(1);
        let settle = {
            let f = fs[0].clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                f.settle_success(0.0, 1);
            })
        };
        let wait = WaitSpec {
            timeout: Some(Duration::MAX),
            ..spec(1, 0)
        };
        let reached = tokio::time::timeout(
            Duration::from_secs(5),
            wait_until(&fs, wait, MonitoringMode::Storage, &Notify::new()),
        )
        .await;
        assert_eq!(reached.ok(), Some(true));
        settle.await.unwrap();
    }

    #[test]
    fn test_monitoring_mode_parsing() {
        assert_eq!("RabbitMQ".parse::<MonitoringMode>().unwrap(), MonitoringMode::Rabbitmq);
        assert!("kafka".parse::<MonitoringMode>().is_err());
    }
}
