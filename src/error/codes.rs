/// Error code registry for durable-flow
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Promise and event errors
/// - 3000-3999: Storage errors
/// - 4000-4999: Step execution errors
/// - 5000-5999: Pipeline / orchestration errors
/// - 6000-6999: Recovery errors
/// - 9000-9999: Other errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1003;

    // Promise and event errors (2000-2999)
    pub const PROMISE_GENERIC: u16 = 2000;
    pub const PROMISE_NOT_FOUND: u16 = 2001;
    pub const PROMISE_ALREADY_EXISTS: u16 = 2002;
    pub const PROMISE_INVALID_TRANSITION: u16 = 2003;
    pub const PROMISE_REJECTED: u16 = 2004;
    pub const PROMISE_CANCELLED: u16 = 2005;
    pub const PROMISE_TIMED_OUT: u16 = 2006;
    pub const PROMISE_DECODE_ERROR: u16 = 2007;
    pub const PROMISE_INVALID_TRIGGER: u16 = 2008;

    // Storage errors (3000-3999)
    pub const STORAGE_GENERIC: u16 = 3000;
    pub const STORAGE_IO_ERROR: u16 = 3001;
    pub const STORAGE_NOT_FOUND: u16 = 3004;
    pub const STORAGE_ALREADY_EXISTS: u16 = 3005;
    pub const STORAGE_CORRUPTED: u16 = 3006;
    pub const STORAGE_LOCK_FAILED: u16 = 3007;
    pub const STORAGE_BACKEND_ERROR: u16 = 3010;
    pub const STORAGE_SERIALIZATION_ERROR: u16 = 3011;
    pub const STORAGE_INVALID_KEY: u16 = 3012;

    // Step execution errors (4000-4999)
    pub const STEP_GENERIC: u16 = 4000;
    pub const STEP_TIMEOUT: u16 = 4002;
    pub const STEP_SUSPENSION_TIMEOUT: u16 = 4003;
    pub const STEP_CANCELLED: u16 = 4006;
    pub const STEP_COMPENSATION_FAILED: u16 = 4010;

    // Pipeline errors (5000-5999)
    pub const PIPELINE_GENERIC: u16 = 5000;
    pub const PIPELINE_NOT_FOUND: u16 = 5001;
    pub const PIPELINE_INVALID: u16 = 5002;
    pub const PIPELINE_STEP_FAILED: u16 = 5003;
    pub const PIPELINE_EXECUTION_NOT_FOUND: u16 = 5004;
    pub const PIPELINE_ALREADY_RUNNING: u16 = 5005;
    pub const PIPELINE_CANCELLED: u16 = 5006;
    pub const PIPELINE_CHECKPOINT_ERROR: u16 = 5008;
    pub const PIPELINE_RESUME_ERROR: u16 = 5009;
    pub const PIPELINE_MIGRATION_ERROR: u16 = 5010;

    // Recovery errors (6000-6999)
    pub const RECOVERY_GENERIC: u16 = 6000;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Failed to parse configuration",
        1003 => "Invalid value in configuration",

        2000 => "Generic promise error",
        2001 => "Promise not found",
        2002 => "Promise already exists",
        2003 => "Illegal promise state transition",
        2004 => "Promise was rejected",
        2005 => "Promise was cancelled",
        2006 => "Suspension timed out",
        2007 => "Promise value could not be decoded",
        2008 => "Invalid suspension trigger",

        3000 => "Generic storage error",
        3001 => "Storage I/O error",
        3004 => "Storage item not found",
        3005 => "Storage item already exists",
        3006 => "Persisted record is corrupted",
        3007 => "Failed to acquire storage lock",
        3010 => "Storage backend error",
        3011 => "Failed to serialize data",
        3012 => "Invalid storage key",

        4000 => "Generic step error",
        4002 => "Step timed out",
        4003 => "Step suspension timed out",
        4006 => "Step was cancelled",
        4010 => "Step compensation failed",

        5000 => "Generic pipeline error",
        5001 => "Pipeline not registered",
        5002 => "Pipeline definition is invalid",
        5003 => "Pipeline step failed permanently",
        5004 => "Execution not found",
        5005 => "Execution is already running",
        5006 => "Execution was cancelled",
        5008 => "Checkpoint could not be persisted",
        5009 => "Execution cannot be resumed",
        5010 => "Continuation migration failed",

        6000 => "Generic recovery error",

        9000 => "Unknown error",
        _ => "Unknown error code",
    }
}
