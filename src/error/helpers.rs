use super::ComputeError;

/// Extension trait for attaching a foreign error as the source of a ComputeError
pub trait ErrorExt<T> {
    fn to_config_error(self, message: impl Into<String>) -> Result<T, ComputeError>;
    fn to_storage_error(self, message: impl Into<String>) -> Result<T, ComputeError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn to_config_error(self, message: impl Into<String>) -> Result<T, ComputeError> {
        self.map_err(|e| ComputeError::config(message).with_source(e))
    }

    fn to_storage_error(self, message: impl Into<String>) -> Result<T, ComputeError> {
        self.map_err(|e| ComputeError::storage(message).with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_source_is_kept() {
        let res: Result<(), std::io::Error> = Err(std::io::Error::other("disk full"));
        let err = res.to_storage_error("cannot write plot").unwrap_err();
        assert_eq!(err.code(), ErrorCode::STORAGE_GENERIC);
        assert!(err.developer_message().contains("caused by: disk full"));
    }

    #[test]
    fn test_string_errors_convert() {
        let res: Result<(), String> = Err("reload rejected".to_string());
        let err = res.to_config_error("failed to apply log level").unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
