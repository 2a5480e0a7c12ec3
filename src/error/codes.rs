/// Error code registry for compute-mcp
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Resolution errors
/// - 3000-3999: Storage errors
/// - 4000-4999: Execution errors
/// - 5000-5999: Backend errors
/// - 6000-6999: Protocol errors
/// - 7000-7999: Validation errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_MISSING_REQUIRED: u16 = 1004;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;
    pub const CONFIG_NO_EXECUTOR: u16 = 1006;
    pub const CONFIG_UNSUPPORTED_OPTION: u16 = 1007;

    // Resolution errors (2000-2999)
    pub const RESOLUTION_GENERIC: u16 = 2000;
    pub const RESOLUTION_FUNCTION_NOT_FOUND: u16 = 2001;

    // Storage errors (3000-3999)
    pub const STORAGE_GENERIC: u16 = 3000;
    pub const STORAGE_IO_ERROR: u16 = 3001;
    pub const STORAGE_PERMISSION_DENIED: u16 = 3002;
    pub const STORAGE_NOT_FOUND: u16 = 3004;
    pub const STORAGE_ALREADY_EXISTS: u16 = 3005;
    pub const STORAGE_BACKEND_ERROR: u16 = 3010;
    pub const STORAGE_SERIALIZATION_ERROR: u16 = 3011;

    // Execution errors (4000-4999)
    pub const EXEC_GENERIC: u16 = 4000;
    pub const EXEC_TIMEOUT: u16 = 4002;
    pub const EXEC_ACTIVATION_FAILED: u16 = 4003;
    pub const EXEC_INTERRUPTED: u16 = 4006;

    // Backend errors (5000-5999)
    pub const BACKEND_UNAVAILABLE: u16 = 5001;
    pub const BACKEND_WORKER_LOST: u16 = 5002;

    // Protocol errors (6000-6999)
    pub const PROTOCOL_GENERIC: u16 = 6000;
    pub const PROTOCOL_UNKNOWN_TOOL: u16 = 6001;
    pub const PROTOCOL_UNKNOWN_SESSION: u16 = 6002;

    // Validation errors (7000-7999)
    pub const VALIDATION_GENERIC: u16 = 7000;
    pub const VALIDATION_REQUIRED_FIELD: u16 = 7001;
    pub const VALIDATION_INVALID_TYPE: u16 = 7002;
    pub const VALIDATION_OUT_OF_RANGE: u16 = 7003;
    pub const VALIDATION_INVALID_INPUT: u16 = 7008;
    pub const VALIDATION_INVALID_DATA: u16 = 7009;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_INTERNAL_ERROR: u16 = 9004;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid YAML syntax in configuration",
        1003 => "Invalid JSON syntax",
        1004 => "Missing required configuration field",
        1005 => "Invalid configuration value",
        1006 => "No executor has been configured for this session",
        1007 => "Option not supported by this executor variant",

        // Resolution errors
        2000 => "Generic resolution error",
        2001 => "Function is not registered",

        // Storage errors
        3000 => "Generic storage error",
        3001 => "Storage I/O error",
        3002 => "Storage permission denied",
        3004 => "Storage object not found",
        3005 => "Storage object already exists",
        3010 => "Storage backend error",
        3011 => "Storage serialization error",

        // Execution errors
        4000 => "Generic execution error",
        4002 => "Execution timed out",
        4003 => "Activation raised an error",
        4006 => "Execution interrupted",

        // Backend errors
        5001 => "Backend not available",
        5002 => "Worker lost before the activation settled",

        // Protocol errors
        6000 => "Generic protocol error",
        6001 => "Unknown tool",
        6002 => "Unknown session",

        // Validation errors
        7000 => "Generic validation error",
        7001 => "Required field is missing",
        7002 => "Invalid type",
        7003 => "Value out of range",
        7008 => "Invalid input",
        7009 => "Invalid data",

        // Other errors
        9000 => "Generic error",
        9004 => "Internal error",

        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_are_described() {
        assert_eq!(
            describe_error_code(ErrorCode::CONFIG_NO_EXECUTOR),
            "No executor has been configured for this session"
        );
        assert_eq!(
            describe_error_code(ErrorCode::RESOLUTION_FUNCTION_NOT_FOUND),
            "Function is not registered"
        );
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(describe_error_code(4242), "Unknown error code");
    }
}
