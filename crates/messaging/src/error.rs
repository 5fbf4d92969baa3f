//! Messaging error types.

use common::{ErrorCode, error_codes};
use modeling::ModelingError;
use thiserror::Error;

use crate::wait::CommandStage;

/// Errors raised by buses, the dispatcher and wait notification channels.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Nobody is subscribed to the bus.
    #[error("No receiver is subscribed to the bus")]
    NoReceiver,

    /// The dispatcher has shut down.
    #[error("Dispatcher is shut down")]
    Closed,

    #[error("Remote wait notification failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ErrorCode for MessagingError {
    fn error_code(&self) -> &'static str {
        match self {
            MessagingError::NoReceiver | MessagingError::Closed => error_codes::ILLEGAL_STATE,
            MessagingError::Http(_) => error_codes::INTERNAL,
            MessagingError::Serialization(_) => error_codes::BAD_REQUEST,
        }
    }
}

/// Errors surfaced to command gateway callers.
///
/// Command failures reported by the dispatcher are not errors here: they
/// come back as a [`crate::CommandResult`] carrying the failure's code.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The command was rejected before it was sent.
    #[error("Invalid command: {0}")]
    Validation(#[from] ModelingError),

    /// The command could not be handed to the bus.
    #[error("Failed to send command: {0}")]
    Send(#[from] MessagingError),

    /// No signal for the awaited stage arrived in time. The command itself
    /// keeps running.
    #[error("Timed out waiting for command {command_id} to reach {stage}")]
    WaitTimeout {
        command_id: String,
        stage: CommandStage,
    },

    /// The wait registration was dropped before a signal arrived.
    #[error("Wait for command {0} was cancelled")]
    WaitCancelled(String),
}

impl ErrorCode for GatewayError {
    fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Validation(e) => e.error_code(),
            GatewayError::Send(e) => e.error_code(),
            GatewayError::WaitTimeout { .. } => error_codes::REQUEST_TIMEOUT,
            GatewayError::WaitCancelled(_) => error_codes::ILLEGAL_STATE,
        }
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
