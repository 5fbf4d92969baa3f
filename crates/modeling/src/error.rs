//! Modeling error types.

use common::{AggregateId, ErrorCode, NamedAggregate, error_codes};
use event_store::{DomainEventStream, EventStoreError, Version};
use thiserror::Error;

/// A command handler refused the command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandRejected {
    pub error_code: String,
    pub message: String,
}

impl CommandRejected {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    /// The command does not fit the aggregate's current state.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(error_codes::ILLEGAL_STATE, message)
    }

    /// The command carries invalid data.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(error_codes::BAD_REQUEST, message)
    }
}

/// Errors that can occur while rehydrating aggregates or processing commands.
#[derive(Debug, Error)]
pub enum ModelingError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stream does not continue the aggregate's current version.
    #[error(
        "Sourcing version conflict for {}: expected stream to start at {expected}, got {}",
        .stream.aggregate_id,
        .stream.head_version()
    )]
    SourcingVersionConflict {
        stream: Box<DomainEventStream>,
        expected: Version,
    },

    /// A stream of another aggregate was applied.
    #[error("Event stream of {actual} cannot be applied to {expected}")]
    AggregateIdMismatch {
        expected: AggregateId,
        actual: AggregateId,
    },

    /// The command names an aggregate version other than the current one.
    #[error(
        "Command expects {aggregate_id} at version {expected}, but it is at version {actual}"
    )]
    CommandExpectVersionConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// Aggregate not found.
    #[error("Aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// The aggregate was deleted and only accepts recovery.
    #[error("Aggregate {0} is deleted")]
    AggregateDeleted(AggregateId),

    /// No handler is registered for the command.
    #[error("Command {command} is not defined for {named_aggregate}")]
    UndefinedCommand {
        named_aggregate: NamedAggregate,
        command: String,
    },

    /// The command message itself is malformed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The command handler refused the command.
    #[error("Command rejected: {0}")]
    Rejected(#[from] CommandRejected),
}

impl ErrorCode for ModelingError {
    fn error_code(&self) -> &'static str {
        match self {
            ModelingError::EventStore(e) => e.error_code(),
            ModelingError::Serialization(_) => error_codes::BAD_REQUEST,
            ModelingError::SourcingVersionConflict { .. } => {
                error_codes::SOURCING_VERSION_CONFLICT
            }
            ModelingError::AggregateIdMismatch { .. } => error_codes::ILLEGAL_STATE,
            ModelingError::CommandExpectVersionConflict { .. } => {
                error_codes::COMMAND_EXPECT_VERSION_CONFLICT
            }
            ModelingError::AggregateNotFound(_) => error_codes::AGGREGATE_NOT_FOUND,
            ModelingError::AggregateDeleted(_) => error_codes::ILLEGAL_ACCESS_DELETED_AGGREGATE,
            ModelingError::UndefinedCommand { .. } => error_codes::UNDEFINED_COMMAND,
            ModelingError::InvalidCommand(_) => error_codes::COMMAND_VALIDATION,
            ModelingError::Rejected(_) => error_codes::ILLEGAL_STATE,
        }
    }
}

impl ModelingError {
    /// The error code to report, including codes chosen by command handlers.
    pub fn to_error_info(&self) -> common::ErrorInfo {
        match self {
            ModelingError::Rejected(rejected) => {
                common::ErrorInfo::new(rejected.error_code.clone(), rejected.message.clone())
            }
            other => common::ErrorInfo::of(other),
        }
    }
}

/// Result type for modeling operations.
pub type Result<T> = std::result::Result<T, ModelingError>;
