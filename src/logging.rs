//! Tracing setup and runtime log-level control
//!
//! The binary installs an `EnvFilter` behind a reload layer. Executors
//! configured with a `log_level` retune the crate's own directive through
//! [`LogControl`] without touching dependency levels.

use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

use crate::error::{ComputeError, ErrorCode, ErrorExt, Result};

const CRATE_TARGET: &str = "compute_mcp";

type ReloadFn = dyn Fn(EnvFilter) -> std::result::Result<(), String> + Send + Sync;

/// Handle for changing the crate's log level after startup
#[derive(Clone)]
pub struct LogControl {
    base: Arc<str>,
    reload: Arc<ReloadFn>,
}

impl std::fmt::Debug for LogControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogControl").field("base", &self.base).finish()
    }
}

impl LogControl {
    /// Apply an executor log level (`DEBUG`, `INFO`, `WARNING`, `ERROR`,
    /// `CRITICAL`); `None` silences the crate's logs.
    pub fn apply(&self, level: Option<&str>) -> Result<()> {
        let crate_level = match level {
            Some(level) => tracing_level(level)?,
            None => "off",
        };
        let directives = format!("{},{}={}", self.base, CRATE_TARGET, crate_level);
        (self.reload)(EnvFilter::new(directives)).to_config_error("failed to apply log level")
    }
}

/// Translate an executor log level name into a tracing level
pub fn tracing_level(level: &str) -> Result<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARN" | "WARNING" => Ok("warn"),
        "ERROR" | "CRITICAL" => Ok("error"),
        other => Err(ComputeError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!(
                "invalid log_level '{}' (expected DEBUG, INFO, WARNING, ERROR or CRITICAL)",
                other
            ),
        )),
    }
}

/// Install the global subscriber for the given `-v` count
pub fn init(verbose: u8) -> LogControl {
    let base = match verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,tower=debug", // -vvv shows everything including dependencies
    };

    let (filter, handle) = reload::Layer::new(EnvFilter::new(base));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose >= 2) // Show target module for -vv and above
                .with_thread_ids(verbose >= 3) // Show thread IDs for -vvv
                .with_line_number(verbose >= 3), // Show line numbers for -vvv
        )
        .init();

    LogControl {
        base: Arc::from(base),
        reload: Arc::new(move |filter: EnvFilter| {
            handle
                .reload(filter)
                .map_err(|e: reload::Error| e.to_string())
        }),
    }
}

/// A control that accepts level changes without a live subscriber (tests, embedding)
pub fn detached() -> LogControl {
    LogControl {
        base: Arc::from("info"),
        reload: Arc::new(|_: EnvFilter| Ok::<(), String>(())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(tracing_level("INFO").unwrap(), "info");
        assert_eq!(tracing_level("warning").unwrap(), "warn");
        assert_eq!(tracing_level("CRITICAL").unwrap(), "error");
        assert!(tracing_level("LOUD").is_err());
    }

    #[test]
    fn test_detached_control_accepts_levels() {
        let control = detached();
        control.apply(Some("DEBUG")).unwrap();
        control.apply(None).unwrap();
        assert!(control.apply(Some("LOUD")).is_err());
    }
}
