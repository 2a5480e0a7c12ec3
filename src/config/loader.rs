use directories::ProjectDirs;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{ComputeError, ErrorCode, Result};

/// Environment variable naming the executor config file
pub const CONFIG_FILE_ENV: &str = "COMPUTE_MCP_CONFIG_FILE";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = ".compute_mcp_config.yaml";

/// Directory for user-level configuration and default storage
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "compute-mcp")
}

/// Locates and loads YAML executor configuration
pub struct ConfigLoader {
    search_local: bool,
    search_user: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            search_local: true,
            search_user: true,
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only honour explicit paths and the environment variable
    pub fn explicit_only() -> Self {
        Self {
            search_local: false,
            search_user: false,
        }
    }

    /// Find the config file: explicit path, then `COMPUTE_MCP_CONFIG_FILE`,
    /// then the working directory, then the user config directory.
    ///
    /// An explicit or environment-provided path that does not exist is an error;
    /// the implicit locations are optional.
    pub fn locate(&self, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            return require_exists(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if !path.is_empty() {
                return require_exists(PathBuf::from(path));
            }
        }

        if self.search_local {
            let local = PathBuf::from(LOCAL_CONFIG_FILE);
            if local.is_file() {
                return Ok(Some(local));
            }
        }

        if self.search_user {
            if let Some(dirs) = project_dirs() {
                let user = dirs.config_dir().join("config.yaml");
                if user.is_file() {
                    return Ok(Some(user));
                }
            }
        }

        Ok(None)
    }
}

fn require_exists(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.is_file() {
        Ok(Some(path))
    } else {
        Err(ComputeError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("Configuration file not found: {}", path.display()),
        ))
    }
}

/// Parse a YAML file into a JSON object
pub async fn load_yaml(path: &Path) -> Result<Value> {
    debug!("Loading executor configuration from {}", path.display());
    let content = fs::read_to_string(path).await.map_err(|e| {
        ComputeError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("Cannot read configuration file {}", path.display()),
        )
        .with_source(e)
    })?;
    parse_yaml(&content).map_err(|e| e.with_context(path.display()))
}

/// Parse YAML text into a JSON object; empty documents yield an empty object
pub fn parse_yaml(content: &str) -> Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value = serde_yaml::from_str(content)?;
    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        _ => Err(ComputeError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            "configuration root must be a mapping",
        )),
    }
}
