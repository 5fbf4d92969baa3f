//! Event processor error types.

use common::{ErrorCode, error_codes};
use thiserror::Error;

/// Errors raised while delivering events to reactions.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// A reaction failed.
    #[error("Reaction {function} failed: {source}")]
    Reaction {
        function: common::FunctionInfo,
        #[source]
        source: anyhow::Error,
    },

    /// No reaction is registered under the function.
    #[error("No reaction registered for {0}")]
    UnknownFunction(common::FunctionInfo),

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),

    /// A blocking task panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The blocking pool was closed.
    #[error("Blocking pool is closed")]
    PoolClosed,
}

impl ErrorCode for ProcessorError {
    fn error_code(&self) -> &'static str {
        match self {
            ProcessorError::Reaction { .. } | ProcessorError::Join(_) => error_codes::INTERNAL,
            ProcessorError::UnknownFunction(_) => error_codes::UNDEFINED_COMMAND,
            ProcessorError::EventStore(e) => e.error_code(),
            ProcessorError::Messaging(e) => e.error_code(),
            ProcessorError::PoolClosed => error_codes::ILLEGAL_STATE,
        }
    }
}

/// Result type for event processor operations.
pub type Result<T> = std::result::Result<T, ProcessorError>;
