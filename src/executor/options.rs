//! Options of the management operations
//!
//! These deserialize straight from the `args` object of the corresponding
//! tool. Unknown keys are rejected; missing keys take the defaults below.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// When a `wait` returns
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ReturnWhen {
    /// Return immediately with the current partition
    Always,
    AnyCompleted,
    AllCompleted,
    /// Percentage of settled futures, `0..=100`
    Percent(f64),
}

impl Default for ReturnWhen {
    fn default() -> Self {
        Self::AllCompleted
    }
}

impl ReturnWhen {
    /// Number of settled futures out of `total` that satisfies the condition
    pub fn required(self, total: usize) -> usize {
        match self {
            Self::Always => 0,
            Self::AnyCompleted => total.min(1),
            Self::AllCompleted => total,
            Self::Percent(p) => ((total as f64) * p / 100.0).ceil().min(total as f64) as usize,
        }
    }
}

impl<'de> Deserialize<'de> for ReturnWhen {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Self::default()),
            Value::Number(n) => {
                let p = n.as_f64().unwrap_or(-1.0);
                if (0.0..=100.0).contains(&p) {
                    Ok(Self::Percent(p))
                } else {
                    Err(D::Error::custom(format!(
                        "return_when percentage must be within 0..=100, got {}",
                        n
                    )))
                }
            }
            Value::String(s) => match s.to_ascii_uppercase().as_str() {
                "ALWAYS" => Ok(Self::Always),
                "ANY_COMPLETED" => Ok(Self::AnyCompleted),
                "ALL_COMPLETED" => Ok(Self::AllCompleted),
                other => Err(D::Error::custom(format!(
                    "unknown return_when '{}' (expected ALWAYS, ANY_COMPLETED, ALL_COMPLETED or a percentage)",
                    other
                ))),
            },
            other => Err(D::Error::custom(format!(
                "return_when must be a string or a number, got {}",
                other
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_wait_dur() -> f64 {
    1.0
}

/// Seconds as a `Duration`; negative, non-finite and unrepresentable values yield `None`
fn seconds(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|s| *s >= 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetResultOptions {
    #[serde(default = "default_true")]
    pub throw_except: bool,
    /// Seconds; `None` waits indefinitely
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default = "GetResultOptions::default_threadpool")]
    pub threadpool_size: usize,
    #[serde(default = "default_wait_dur")]
    pub wait_dur_sec: f64,
    #[serde(default = "default_true")]
    pub show_progressbar: bool,
}

impl GetResultOptions {
    fn default_threadpool() -> usize {
        128
    }

    pub fn timeout(&self) -> Option<Duration> {
        seconds(self.timeout)
    }

    pub fn wait_dur(&self) -> Duration {
        seconds(Some(self.wait_dur_sec)).unwrap_or(Duration::from_secs(1))
    }
}

impl Default for GetResultOptions {
    fn default() -> Self {
        Self {
            throw_except: true,
            timeout: None,
            threadpool_size: Self::default_threadpool(),
            wait_dur_sec: default_wait_dur(),
            show_progressbar: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitOptions {
    #[serde(default = "default_true")]
    pub throw_except: bool,
    #[serde(default)]
    pub return_when: ReturnWhen,
    #[serde(default)]
    pub download_results: bool,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default = "WaitOptions::default_threadpool")]
    pub threadpool_size: usize,
    #[serde(default = "default_wait_dur")]
    pub wait_dur_sec: f64,
    #[serde(default = "default_true")]
    pub show_progressbar: bool,
}

impl WaitOptions {
    fn default_threadpool() -> usize {
        64
    }

    pub fn timeout(&self) -> Option<Duration> {
        seconds(self.timeout)
    }

    pub fn wait_dur(&self) -> Duration {
        seconds(Some(self.wait_dur_sec)).unwrap_or(Duration::from_secs(1))
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            throw_except: true,
            return_when: ReturnWhen::default(),
            download_results: false,
            timeout: None,
            threadpool_size: Self::default_threadpool(),
            wait_dur_sec: default_wait_dur(),
            show_progressbar: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanOptions {
    /// Also delete the executor's cloud objects
    #[serde(default = "default_true")]
    pub clean_cloudobjects: bool,
    /// Also delete cached function metadata
    #[serde(default)]
    pub clean_fn: bool,
    /// Clean futures that have not settled
    #[serde(default)]
    pub force: bool,
    /// Teardown mode: log at debug level only
    #[serde(default)]
    pub on_exit: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            clean_cloudobjects: true,
            clean_fn: false,
            force: false,
            on_exit: false,
        }
    }
}

impl CleanOptions {
    pub fn teardown() -> Self {
        Self {
            force: true,
            on_exit: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlotOptions {
    /// Path prefix of the rendered files
    #[serde(default)]
    pub dst: Option<PathBuf>,
    /// Width and height in inches
    #[serde(default = "PlotOptions::default_figsize")]
    pub figsize: (f64, f64),
}

impl PlotOptions {
    fn default_figsize() -> (f64, f64) {
        (10.0, 6.0)
    }
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            dst: None,
            figsize: Self::default_figsize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_result_defaults() {
        let options: GetResultOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, GetResultOptions::default());
        assert_eq!(options.threadpool_size, 128);
        assert_eq!(options.wait_dur(), Duration::from_secs(1));
        assert!(options.timeout().is_none());
    }

    #[test]
    fn test_huge_timeout_waits_indefinitely() {
        let options: GetResultOptions =
            serde_json::from_value(json!({"timeout": 1e20, "wait_dur_sec": 1e20})).unwrap();
        assert!(options.timeout().is_none());
        assert_eq!(options.wait_dur(), Duration::from_secs(1));

        let options: WaitOptions =
            serde_json::from_value(json!({"timeout": 1e20, "wait_dur_sec": 1e20})).unwrap();
        assert!(options.timeout().is_none());
        assert_eq!(options.wait_dur(), Duration::from_secs(1));
    }

    #[test]
    fn test_negative_timeout_ignored() {
        let options: WaitOptions =
            serde_json::from_value(json!({"timeout": -3.0, "wait_dur_sec": 0.5})).unwrap();
        assert!(options.timeout().is_none());
        assert_eq!(options.wait_dur(), Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = serde_json::from_value::<WaitOptions>(json!({"when": 50})).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_return_when_forms() {
        let parse = |v: Value| serde_json::from_value::<ReturnWhen>(v).unwrap();
        assert_eq!(parse(json!("ALWAYS")), ReturnWhen::Always);
        assert_eq!(parse(json!("any_completed")), ReturnWhen::AnyCompleted);
        assert_eq!(parse(json!(50)), ReturnWhen::Percent(50.0));
        assert!(serde_json::from_value::<ReturnWhen>(json!(150)).is_err());
    }

    #[test]
    fn test_required_counts() {
        assert_eq!(ReturnWhen::Always.required(4), 0);
        assert_eq!(ReturnWhen::AnyCompleted.required(4), 1);
        assert_eq!(ReturnWhen::AnyCompleted.required(0), 0);
        assert_eq!(ReturnWhen::AllCompleted.required(4), 4);
        assert_eq!(ReturnWhen::Percent(50.0).required(3), 2);
    }

    #[test]
    fn test_plot_figsize_from_list() {
        let options: PlotOptions =
            serde_json::from_value(json!({"dst": "out/run", "figsize": [8, 4]})).unwrap();
        assert_eq!(options.figsize, (8.0, 4.0));
        assert_eq!(options.dst, Some(PathBuf::from("out/run")));
    }
}
