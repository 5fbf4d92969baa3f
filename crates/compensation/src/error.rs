//! Compensation error types.

use common::{AggregateId, ErrorCode, FunctionInfo, error_codes};
use event_store::{EventId, EventStoreError};
use modeling::ModelingError;
use thiserror::Error;

/// Errors that can occur while recording or retrying failed executions.
#[derive(Debug, Error)]
pub enum CompensationError {
    /// A command against an execution record failed.
    #[error("Execution record error: {0}")]
    Modeling(#[from] ModelingError),

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// No execution record exists under the id.
    #[error("Execution record not found: {0}")]
    RecordNotFound(AggregateId),

    /// The failed event is no longer in the event store.
    #[error("Event {event_id} of {aggregate_id} not found")]
    EventNotFound {
        aggregate_id: AggregateId,
        event_id: EventId,
    },

    /// No reaction is registered under the recorded function.
    #[error("No reaction registered for {0}")]
    UnknownFunction(FunctionInfo),
}

impl ErrorCode for CompensationError {
    fn error_code(&self) -> &'static str {
        match self {
            CompensationError::Modeling(e) => e.error_code(),
            CompensationError::EventStore(e) => e.error_code(),
            CompensationError::RecordNotFound(_) | CompensationError::EventNotFound { .. } => {
                error_codes::AGGREGATE_NOT_FOUND
            }
            CompensationError::UnknownFunction(_) => error_codes::UNDEFINED_COMMAND,
        }
    }
}

/// Convenience type alias for compensation results.
pub type Result<T> = std::result::Result<T, CompensationError>;
