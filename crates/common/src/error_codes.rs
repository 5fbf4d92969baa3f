//! Stable error codes carried by command results and wait signals.

use serde::{Deserialize, Serialize};

pub const SUCCEEDED: &str = "Ok";
pub const COMMAND_DUPLICATE: &str = "CommandDuplicate";
pub const DUPLICATE_AGGREGATE_ID: &str = "DuplicateAggregateId";
pub const EVENT_VERSION_CONFLICT: &str = "EventVersionConflict";
pub const DUPLICATE_REQUEST_ID: &str = "DuplicateRequestId";
pub const SOURCING_VERSION_CONFLICT: &str = "SourcingVersionConflict";
pub const COMMAND_EXPECT_VERSION_CONFLICT: &str = "CommandExpectVersionConflict";
pub const AGGREGATE_NOT_FOUND: &str = "AggregateNotFound";
pub const ILLEGAL_ACCESS_DELETED_AGGREGATE: &str = "IllegalAccessDeletedAggregate";
pub const COMMAND_VALIDATION: &str = "CommandValidation";
pub const UNDEFINED_COMMAND: &str = "UndefinedCommand";
pub const REQUEST_TIMEOUT: &str = "RequestTimeout";
pub const BAD_REQUEST: &str = "BadRequest";
pub const ILLEGAL_STATE: &str = "IllegalState";
pub const INTERNAL: &str = "Internal";

/// Implemented by error types that map onto a stable error code.
pub trait ErrorCode {
    fn error_code(&self) -> &'static str;
}

/// An error code with its human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_code: String,
    pub error_msg: String,
}

impl ErrorInfo {
    pub fn ok() -> Self {
        Self {
            error_code: SUCCEEDED.to_string(),
            error_msg: String::new(),
        }
    }

    pub fn new(error_code: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            error_msg: error_msg.into(),
        }
    }

    /// Captures the code and display message of an error.
    pub fn of<E: ErrorCode + std::fmt::Display>(error: &E) -> Self {
        Self::new(error.error_code(), error.to_string())
    }

    pub fn succeeded(&self) -> bool {
        self.error_code == SUCCEEDED
    }
}

impl Default for ErrorInfo {
    fn default() -> Self {
        Self::ok()
    }
}
