use std::fmt::Display;
use thiserror::Error;

pub mod codes;
pub mod helpers;

pub use codes::{describe_error_code, ErrorCode};
pub use helpers::ErrorExt;

/// The unified error type for compute-mcp
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Resolution error: {message}")]
    Resolution {
        code: u16,
        message: String,
        function: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Storage error: {message}")]
    Storage {
        code: u16,
        message: String,
        key: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Execution error: {message}")]
    Execution {
        code: u16,
        message: String,
        call_id: Option<String>,
        kind: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Backend error: {message}")]
    Backend {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Protocol error: {message}")]
    Protocol {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Validation error: {message}")]
    Validation {
        code: u16,
        message: String,
        field: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ComputeError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Raised by every job or management operation that runs before an executor exists
    pub fn no_executor() -> Self {
        Self::config_with_code(
            ErrorCode::CONFIG_NO_EXECUTOR,
            "no executor configured; call one of the *_executor tools first",
        )
    }

    /// Create a resolution error for a function name that is not registered
    pub fn function_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Resolution {
            code: ErrorCode::RESOLUTION_FUNCTION_NOT_FOUND,
            message: format!("function '{}' is not registered", name),
            function: Some(name),
            source: None,
        }
    }

    /// Create a storage error with default code
    pub fn storage(message: impl Into<String>) -> Self {
        Self::storage_with_code(ErrorCode::STORAGE_GENERIC, message, None)
    }

    /// Create a storage error with specific code and object key
    pub fn storage_with_code(code: u16, message: impl Into<String>, key: Option<String>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            key,
            source: None,
        }
    }

    /// Create an execution error with default code
    pub fn execution(message: impl Into<String>) -> Self {
        Self::execution_with_code(ErrorCode::EXEC_GENERIC, message, None)
    }

    /// Create an execution error with specific code and call id
    pub fn execution_with_code(
        code: u16,
        message: impl Into<String>,
        call_id: Option<String>,
    ) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            call_id,
            kind: None,
            source: None,
        }
    }

    /// Create a backend error with specific code
    pub fn backend_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with specific code
    pub fn protocol_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a validation error with default code
    pub fn validation(message: impl Into<String>) -> Self {
        Self::validation_with_code(ErrorCode::VALIDATION_GENERIC, message, None)
    }

    /// Create a validation error with specific code and field
    pub fn validation_with_code(
        code: u16,
        message: impl Into<String>,
        field: Option<String>,
    ) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            field,
            source: None,
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Resolution { source: src, .. }
            | Self::Storage { source: src, .. }
            | Self::Execution { source: src, .. }
            | Self::Backend { source: src, .. }
            | Self::Protocol { source: src, .. }
            | Self::Validation { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Resolution { message, .. }
            | Self::Storage { message, .. }
            | Self::Execution { message, .. }
            | Self::Backend { message, .. }
            | Self::Protocol { message, .. }
            | Self::Validation { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Record the error kind raised inside an activation
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        if let Self::Execution {
            kind: ref mut k, ..
        } = self
        {
            *k = Some(kind.into());
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Resolution { code, .. }
            | Self::Storage { code, .. }
            | Self::Execution { code, .. }
            | Self::Backend { code, .. }
            | Self::Protocol { code, .. }
            | Self::Validation { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Short category name, used in structured tool errors
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Resolution { .. } => "resolution",
            Self::Storage { .. } => "storage",
            Self::Execution { .. } => "execution",
            Self::Backend { .. } => "backend",
            Self::Protocol { .. } => "protocol",
            Self::Validation { .. } => "validation",
            Self::Other { .. } => "other",
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Resolution { .. } => 3,
            Self::Storage { .. } => 4,
            Self::Execution { .. } => 5,
            Self::Backend { .. } => 6,
            Self::Protocol { .. } => 7,
            Self::Validation { .. } => 8,
            Self::Other { .. } => 1,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Resolution {
                message, function, ..
            } => match function {
                Some(name) => format!("Cannot resolve '{}': {}", name, message),
                None => format!("Resolution error: {}", message),
            },
            Self::Storage { message, key, .. } => match key {
                Some(k) => format!("Storage error at '{}': {}", k, message),
                None => format!("Storage error: {}", message),
            },
            Self::Execution {
                message,
                call_id,
                kind,
                ..
            } => {
                let mut msg = String::from("Execution error");
                if let Some(id) = call_id {
                    msg.push_str(&format!(" in call {}", id));
                }
                if let Some(k) = kind {
                    msg.push_str(&format!(" ({})", k));
                }
                format!("{}: {}", msg, message)
            }
            Self::Backend { message, .. } => format!("Backend error: {}", message),
            Self::Protocol { message, .. } => format!("Protocol error: {}", message),
            Self::Validation { message, field, .. } => match field {
                Some(f) => format!("Validation error for '{}': {}", f, message),
                None => format!("Validation error: {}", message),
            },
            Self::Other { message, .. } => message.clone(),
        }
    }

    /// Get a developer-friendly error message with full chain
    pub fn developer_message(&self) -> String {
        let mut msg = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            msg.push_str(&format!("\n  caused by: {}", err));
            source = err.source();
        }
        msg
    }
}

/// Type alias for Results using ComputeError
pub type Result<T> = std::result::Result<T, ComputeError>;

impl From<std::io::Error> for ComputeError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, message) = match err.kind() {
            ErrorKind::NotFound => (ErrorCode::STORAGE_NOT_FOUND, "File or directory not found"),
            ErrorKind::PermissionDenied => {
                (ErrorCode::STORAGE_PERMISSION_DENIED, "Permission denied")
            }
            ErrorKind::AlreadyExists => (ErrorCode::STORAGE_ALREADY_EXISTS, "Already exists"),
            ErrorKind::InvalidInput => (ErrorCode::VALIDATION_INVALID_INPUT, "Invalid input"),
            ErrorKind::InvalidData => (ErrorCode::VALIDATION_INVALID_DATA, "Invalid data"),
            ErrorKind::TimedOut => (ErrorCode::EXEC_TIMEOUT, "Operation timed out"),
            ErrorKind::Interrupted => (ErrorCode::EXEC_INTERRUPTED, "Operation interrupted"),
            _ => (ErrorCode::STORAGE_IO_ERROR, "IO operation failed"),
        };

        ComputeError::storage_with_code(code, message, None).with_source(err)
    }
}

impl From<serde_yaml::Error> for ComputeError {
    fn from(err: serde_yaml::Error) -> Self {
        ComputeError::config_with_code(ErrorCode::CONFIG_INVALID_YAML, "Invalid YAML syntax")
            .with_source(err)
    }
}

impl From<serde_json::Error> for ComputeError {
    fn from(err: serde_json::Error) -> Self {
        ComputeError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_DATA,
            format!("Invalid JSON payload: {}", err),
            None,
        )
        .with_source(err)
    }
}

impl From<crate::storage::StorageError> for ComputeError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;

        match err {
            StorageError::Io(io_err) => ComputeError::from(io_err),
            StorageError::NotFound(key) => ComputeError::storage_with_code(
                ErrorCode::STORAGE_NOT_FOUND,
                format!("object not found: {}", key),
                Some(key),
            ),
            StorageError::Serialization(msg) => {
                ComputeError::storage_with_code(ErrorCode::STORAGE_SERIALIZATION_ERROR, msg, None)
            }
            StorageError::Configuration(msg) => {
                ComputeError::config_with_code(ErrorCode::CONFIG_INVALID_VALUE, msg)
            }
            StorageError::Unavailable(msg) => {
                ComputeError::storage_with_code(ErrorCode::STORAGE_BACKEND_ERROR, msg, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation_and_chaining() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "status.json");
        let err = ComputeError::storage("Cannot read status")
            .with_source(io_err)
            .with_context("while waiting for M000");

        assert_eq!(err.code(), ErrorCode::STORAGE_GENERIC);
        assert!(err.to_string().contains("[E3000]"));
        assert!(err.user_message().contains("Cannot read status"));
        assert!(err.developer_message().contains("caused by: status.json"));
    }

    #[test]
    fn test_no_executor_is_config_error() {
        let err = ComputeError::no_executor();
        assert_eq!(err.code(), ErrorCode::CONFIG_NO_EXECUTOR);
        assert_eq!(err.category(), "config");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_execution_error_carries_kind() {
        let err = ComputeError::execution_with_code(
            ErrorCode::EXEC_ACTIVATION_FAILED,
            "boom",
            Some("abc/M000/00001".to_string()),
        )
        .with_kind("ValueError");

        assert_eq!(
            err.user_message(),
            "Execution error in call abc/M000/00001 (ValueError): boom"
        );
    }

    #[test]
    fn test_storage_not_found_keeps_key() {
        let err: ComputeError =
            crate::storage::StorageError::NotFound("bucket/key".to_string()).into();
        assert_eq!(err.code(), ErrorCode::STORAGE_NOT_FOUND);
        assert!(err.user_message().contains("bucket/key"));
    }
}
